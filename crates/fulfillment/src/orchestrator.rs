//! Fulfillment orchestrator: drives a sales order through stock reservation,
//! invoicing, receivables and production across the module gateways.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use common::OrderId;
use inventory::{InventoryError, ReservationLine, ReservationManager, Shortage, deadline_after};
use ledger::{LedgerStore, OriginType, Origin, Reservation, ReservationStatus};

use crate::calendar::add_business_days;
use crate::error::{FulfillmentError, GatewayError, Result, StepCause};
use crate::gateways::{
    FinanceGateway, InvoiceRequest, InvoicingGateway, ProductionGateway, ProductionLine,
    ProductionOrderRequest, ProductionStatus, ReceivableRequest, ReceivableStatus,
    ReceivableUpdate, SalesGateway,
};
use crate::installments;
use crate::order::{DocumentLinks, PaymentTerms, SalesOrder, SalesOrderStatus, StatusUpdate};
use crate::permissions::{AllowAll, PermissionChecker, actions, modules};
use crate::progress::FulfillmentProgress;
use crate::state::FulfillmentState;
use crate::steps;

/// Settings for fulfillment runs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Identity used for permission checks and recorded on reservations.
    pub actor: String,
    /// Installment plan for orders that carry none.
    pub payment_terms: PaymentTerms,
    /// Business days until a production order is due when the sales order
    /// has no delivery date.
    pub production_lead_days: u32,
    /// Deadline for fulfillment reservations while the order is not yet
    /// invoiced. `None` falls back to the reservation manager's default TTL,
    /// if it has one. Invoicing clears the deadline either way.
    pub reservation_ttl: Option<Duration>,
    pub payment_method: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            actor: "fulfillment-service".to_string(),
            payment_terms: PaymentTerms::default(),
            production_lead_days: 7,
            reservation_ttl: None,
            payment_method: "boleto".to_string(),
        }
    }
}

/// Orchestrates order fulfillment across the ERP modules.
///
/// There is no transaction spanning the modules. Each step is a separate
/// call, and a failure after an earlier step committed either compensates
/// (a failed invoice releases the stock) or leaves a named state that a
/// repeated run completes. Every run starts by reading what already exists
/// for the order, so repeating a request never duplicates a document.
pub struct FulfillmentOrchestrator<S, Sa, I, F, P>
where
    S: LedgerStore,
    Sa: SalesGateway,
    I: InvoicingGateway,
    F: FinanceGateway,
    P: ProductionGateway,
{
    reservations: ReservationManager<S>,
    sales: Sa,
    invoicing: I,
    finance: F,
    production: P,
    permissions: Arc<dyn PermissionChecker>,
    config: OrchestratorConfig,
}

impl<S, Sa, I, F, P> FulfillmentOrchestrator<S, Sa, I, F, P>
where
    S: LedgerStore,
    Sa: SalesGateway,
    I: InvoicingGateway,
    F: FinanceGateway,
    P: ProductionGateway,
{
    /// Creates an orchestrator that allows every action and uses the
    /// default configuration.
    pub fn new(
        reservations: ReservationManager<S>,
        sales: Sa,
        invoicing: I,
        finance: F,
        production: P,
    ) -> Self {
        Self {
            reservations,
            sales,
            invoicing,
            finance,
            production,
            permissions: Arc::new(AllowAll),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reservations(&self) -> &ReservationManager<S> {
        &self.reservations
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Fulfills a sales order, creating only the documents that are missing.
    #[tracing::instrument(skip(self), fields(actor = %self.config.actor))]
    pub async fn fulfill(&self, order_id: OrderId) -> Result<FulfillmentProgress> {
        metrics::counter!("fulfillment_started_total").increment(1);
        let started = Instant::now();

        let result = self.run_pipeline(order_id).await;

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("fulfillment_duration_seconds").record(duration);
        match &result {
            Ok(progress) => {
                metrics::counter!("fulfillment_completed_total").increment(1);
                tracing::info!(
                    %order_id,
                    state = %progress.state,
                    steps = ?progress.completed_steps,
                    duration,
                    "fulfillment completed"
                );
            }
            Err(e) => {
                let step = failed_step(e);
                metrics::counter!("fulfillment_failed_total", "step" => step).increment(1);
                tracing::warn!(%order_id, step, error = %e, "fulfillment failed");
            }
        }
        result
    }

    /// Reads the documents that exist for an order without changing anything.
    pub async fn progress(&self, order_id: OrderId) -> Result<FulfillmentProgress> {
        let order = self.load_order(order_id).await?;
        let mut progress = self.load_progress(&order).await?;
        progress.status_synced = order.links == progress.links() && order.status.is_past_approval();
        progress.refresh_state();
        Ok(progress)
    }

    async fn run_pipeline(&self, order_id: OrderId) -> Result<FulfillmentProgress> {
        let order = self.load_order(order_id).await?;
        let mut progress = self.load_progress(&order).await?;

        // 1. Validate
        tracing::info!(step = steps::STEP_VALIDATE, "fulfillment step started");
        let violations = order.violations(progress.invoice.is_some());
        if !violations.is_empty() {
            return Err(FulfillmentError::NotFulfillable {
                order_id,
                violations,
            });
        }
        self.authorize_pipeline(&order, &progress)?;
        progress.complete_step(steps::STEP_VALIDATE);

        // 2-3. Check availability and reserve
        if progress.reservations.is_empty() && progress.invoice.is_none() {
            self.reserve_stock(&order, &mut progress).await?;
        } else {
            progress.complete_step(steps::STEP_CHECK_AVAILABILITY);
            progress.complete_step(steps::STEP_RESERVE_STOCK);
        }

        // 4. Invoice
        if progress.invoice.is_none() {
            tracing::info!(step = steps::STEP_CREATE_INVOICE, "fulfillment step started");
            let request = InvoiceRequest {
                order_id,
                order_number: order.document_number(),
                customer_id: order.customer_id.unwrap_or_default(),
                customer_name: order.customer_name.clone(),
                lines: order.lines.clone(),
                total: order.total,
            };

            match self.invoicing.create_invoice(&request).await {
                Ok(invoice) => {
                    tracing::info!(invoice = %invoice.id, "invoice issued");
                    progress.invoice = Some(invoice);
                    progress.complete_step(steps::STEP_CREATE_INVOICE);
                    self.sync_partial(&order, &progress).await;
                }
                Err(e) => {
                    self.release_stock(&order, &mut progress, &format!("invoice failed: {e}"))
                        .await;
                    return Err(self.step_failed(steps::STEP_CREATE_INVOICE, e, &mut progress));
                }
            }
        } else {
            progress.complete_step(steps::STEP_CREATE_INVOICE);
        }

        // Invoiced stock stays held until shipment consumes it.
        if progress.has_expiring_reservations() {
            tracing::info!(step = steps::STEP_KEEP_RESERVATIONS, "fulfillment step started");
            match self
                .reservations
                .keep_until_consumed(OriginType::SalesOrder, order_id.as_i64(), "order invoiced")
                .await
            {
                Ok(kept) => {
                    for reservation in kept {
                        if let Some(held) = progress
                            .reservations
                            .iter_mut()
                            .find(|r| r.id == reservation.id)
                        {
                            *held = reservation;
                        }
                    }
                    progress.complete_step(steps::STEP_KEEP_RESERVATIONS);
                }
                Err(e) => {
                    return Err(self.step_failed(steps::STEP_KEEP_RESERVATIONS, e, &mut progress));
                }
            }
        }

        // 5. Receivables
        if let Some(invoice) = progress.invoice.clone() {
            tracing::info!(step = steps::STEP_CREATE_RECEIVABLES, "fulfillment step started");
            let terms = order.payment_terms.unwrap_or(self.config.payment_terms);
            let customer = order
                .customer_name
                .clone()
                .unwrap_or_else(|| format!("customer {}", order.customer_id.unwrap_or_default()));

            for installment in installments::plan(invoice.total, &terms, invoice.issued_on) {
                if progress.has_installment(installment.number) {
                    continue;
                }
                let request = ReceivableRequest {
                    description: format!(
                        "Order #{} - {} ({}/{})",
                        order_id, customer, installment.number, installment.total
                    ),
                    amount: installment.amount,
                    due_date: installment.due_date,
                    customer_id: order.customer_id.unwrap_or_default(),
                    order_id,
                    invoice_id: invoice.id.clone(),
                    invoice_number: invoice.number.clone(),
                    installment: installment.number,
                    total_installments: installment.total,
                    payment_method: self.config.payment_method.clone(),
                    status: ReceivableStatus::Pending,
                };

                match self.finance.create_receivable(&request).await {
                    Ok(receivable) => progress.receivables.push(receivable),
                    Err(e) => {
                        self.sync_partial(&order, &progress).await;
                        return Err(self.step_failed(
                            steps::STEP_CREATE_RECEIVABLES,
                            e,
                            &mut progress,
                        ));
                    }
                }
            }
            progress.receivables.sort_by_key(|r| r.installment);
            progress.complete_step(steps::STEP_CREATE_RECEIVABLES);
        }

        // 6. Production
        if order.requires_production {
            if progress.production_order.is_none() {
                tracing::info!(
                    step = steps::STEP_CREATE_PRODUCTION_ORDER,
                    "fulfillment step started"
                );
                let due_date = order.delivery_date.unwrap_or_else(|| {
                    add_business_days(Utc::now().date_naive(), self.config.production_lead_days)
                });
                let request = ProductionOrderRequest {
                    sales_order_id: order_id,
                    customer_id: order.customer_id.unwrap_or_default(),
                    customer_name: order.customer_name.clone(),
                    priority: "normal".to_string(),
                    due_date,
                    notes: format!("Opened from sales order {}", order.document_number()),
                    lines: order.lines.iter().map(ProductionLine::from).collect(),
                    status: ProductionStatus::ToProduce,
                };

                match self.production.create_production_order(&request).await {
                    Ok(production_order) => {
                        tracing::info!(production_order = %production_order.id, "production order opened");
                        progress.production_order = Some(production_order);
                    }
                    Err(e) => {
                        self.sync_partial(&order, &progress).await;
                        return Err(self.step_failed(
                            steps::STEP_CREATE_PRODUCTION_ORDER,
                            e,
                            &mut progress,
                        ));
                    }
                }
            }
            progress.complete_step(steps::STEP_CREATE_PRODUCTION_ORDER);
        }

        // 7. Final status
        let final_status = if progress.production_order.is_some() {
            SalesOrderStatus::InProduction
        } else {
            SalesOrderStatus::Invoiced
        };
        let links = progress.links();
        let needs_sync = order.links != links
            || order.status == SalesOrderStatus::Approved
            || (order.status == SalesOrderStatus::Invoiced && final_status != order.status);
        if needs_sync {
            tracing::info!(step = steps::STEP_SYNC_STATUS, status = %final_status, "fulfillment step started");
            let update = StatusUpdate::new(final_status, links);
            if let Err(e) = self.sales.update_status(order_id, &update).await {
                return Err(self.step_failed(steps::STEP_SYNC_STATUS, e, &mut progress));
            }
        }
        progress.status_synced = true;
        progress.complete_step(steps::STEP_SYNC_STATUS);
        progress.refresh_state();

        Ok(progress)
    }

    async fn reserve_stock(
        &self,
        order: &SalesOrder,
        progress: &mut FulfillmentProgress,
    ) -> Result<()> {
        tracing::info!(step = steps::STEP_CHECK_AVAILABILITY, "fulfillment step started");
        let lines: Vec<ReservationLine> = order.lines.iter().map(ReservationLine::from).collect();

        let shortages = self.reservations.check_availability(&lines).await?;
        if !shortages.is_empty() {
            return Err(FulfillmentError::InsufficientStock {
                order_id: order.id,
                shortages,
            });
        }
        progress.complete_step(steps::STEP_CHECK_AVAILABILITY);

        tracing::info!(step = steps::STEP_RESERVE_STOCK, "fulfillment step started");
        let origin = Origin::sales_order(order.id).with_number(order.document_number());
        let expires_at = self
            .config
            .reservation_ttl
            .map(|ttl| deadline_after(Utc::now(), ttl))
            .transpose()?;

        // reserve_all releases the lines it already held before returning an
        // error, so every failure here leaves nothing reserved.
        match self
            .reservations
            .reserve_all(&lines, origin, Some(&self.config.actor), expires_at)
            .await
        {
            Ok(made) => {
                progress.reservations = made;
                progress.complete_step(steps::STEP_RESERVE_STOCK);
                Ok(())
            }
            Err(InventoryError::InsufficientStock {
                material_code,
                requested,
                available,
            }) => Err(FulfillmentError::InsufficientStock {
                order_id: order.id,
                shortages: vec![Shortage {
                    material_code,
                    requested,
                    available,
                    missing: requested - available,
                }],
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Reverses a fulfillment: cancels pending receivables, the invoice and
    /// the reservations, then reverts the order to `approved`.
    ///
    /// Only an order that fulfillment moved past `approved`, or an approved
    /// order still holding fulfillment documents, can be reversed. A paid
    /// receivable blocks the whole reversal before anything changes.
    /// Production orders are left in place.
    #[tracing::instrument(skip(self), fields(actor = %self.config.actor))]
    pub async fn cancel_fulfillment(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<FulfillmentProgress> {
        let order = self.load_order(order_id).await?;
        let mut progress = self.load_progress(&order).await?;

        if !is_reversible(&order, &progress) {
            tracing::warn!(%order_id, status = %order.status, state = %progress.state, "order is not reversible");
            return Err(FulfillmentError::NotReversible {
                order_id,
                status: order.status,
                state: progress.state,
            });
        }

        let settled: Vec<String> = progress
            .receivables
            .iter()
            .filter(|r| r.status == ReceivableStatus::Paid)
            .map(|r| r.id.clone())
            .collect();
        if !settled.is_empty() {
            tracing::warn!(%order_id, receivables = ?settled, "reversal blocked by settled receivables");
            return Err(FulfillmentError::AlreadySettled {
                order_id,
                receivable_ids: settled,
            });
        }

        for (module, action) in [
            (modules::FINANCE, actions::CANCEL),
            (modules::INVOICING, actions::CANCEL),
            (modules::INVENTORY, actions::CANCEL),
            (modules::SALES, actions::UPDATE),
        ] {
            self.authorize(module, action)?;
        }

        let pending: Vec<String> = progress
            .receivables
            .iter()
            .filter(|r| r.status == ReceivableStatus::Pending)
            .map(|r| r.id.clone())
            .collect();
        for receivable_id in pending {
            let update = ReceivableUpdate::cancel(reason);
            if let Err(e) = self.finance.update_receivable(&receivable_id, &update).await {
                return Err(self.reversal_failed(steps::STEP_CANCEL_RECEIVABLES, e, &mut progress));
            }
            progress.receivables.retain(|r| r.id != receivable_id);
        }
        progress.complete_step(steps::STEP_CANCEL_RECEIVABLES);

        if let Some(invoice) = progress.invoice.clone() {
            if let Err(e) = self.invoicing.cancel_invoice(&invoice.id, reason).await {
                return Err(self.reversal_failed(steps::STEP_CANCEL_INVOICE, e, &mut progress));
            }
            tracing::info!(invoice = %invoice.id, "invoice cancelled");
            progress.invoice = None;
        }
        progress.complete_step(steps::STEP_CANCEL_INVOICE);

        match self
            .reservations
            .cancel_all_for_origin(
                OriginType::SalesOrder,
                order_id.as_i64(),
                &format!("fulfillment reversed: {reason}"),
            )
            .await
        {
            Ok(released) => {
                tracing::info!(released = released.len(), "reservations released");
                progress
                    .reservations
                    .retain(|r| r.status == ReservationStatus::Consumed);
            }
            Err(e) => {
                return Err(self.reversal_failed(steps::STEP_RELEASE_STOCK, e, &mut progress));
            }
        }
        progress.complete_step(steps::STEP_RELEASE_STOCK);

        if let Some(production_order) = &progress.production_order {
            tracing::warn!(
                production_order = %production_order.id,
                "production order stays open after reversal"
            );
        }

        let update = StatusUpdate::new(SalesOrderStatus::Approved, DocumentLinks::default());
        if let Err(e) = self.sales.update_status(order_id, &update).await {
            return Err(self.reversal_failed(steps::STEP_SYNC_STATUS, e, &mut progress));
        }
        progress.complete_step(steps::STEP_SYNC_STATUS);
        progress.status_synced = true;
        progress.state = FulfillmentState::Reversed;

        metrics::counter!("fulfillment_reversals_total").increment(1);
        tracing::info!(%order_id, reason, "fulfillment reversed");
        Ok(progress)
    }

    /// Consumes every active reservation of the order once it ships.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_shipment(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        self.authorize(modules::INVENTORY, actions::CONSUME)?;

        let consumed = self
            .reservations
            .consume_all_for_origin(OriginType::SalesOrder, order_id.as_i64())
            .await?;

        metrics::counter!("fulfillment_shipments_total").increment(1);
        tracing::info!(%order_id, consumed = consumed.len(), "shipment confirmed");
        Ok(consumed)
    }

    /// Reports shop-floor progress to Sales.
    ///
    /// Returns the sales status written, or `None` when the production
    /// status has no sales counterpart.
    #[tracing::instrument(skip(self))]
    pub async fn sync_production_progress(
        &self,
        order_id: OrderId,
        status: ProductionStatus,
    ) -> Result<Option<SalesOrderStatus>> {
        let Some(sales_status) = status.sales_status() else {
            tracing::info!(%order_id, %status, "production status not reported to sales");
            return Ok(None);
        };
        self.authorize(modules::SALES, actions::UPDATE)?;

        let order = self.load_order(order_id).await?;
        self.sales
            .update_status(order_id, &StatusUpdate::new(sales_status, order.links))
            .await?;

        tracing::info!(%order_id, %status, %sales_status, "production progress synced");
        Ok(Some(sales_status))
    }

    async fn load_order(&self, order_id: OrderId) -> Result<SalesOrder> {
        match self.sales.get_order(order_id).await {
            Ok(order) => Ok(order),
            Err(GatewayError::NotFound { .. }) => Err(FulfillmentError::OrderNotFound(order_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuilds the progress record from the documents linked to the order.
    async fn load_progress(&self, order: &SalesOrder) -> Result<FulfillmentProgress> {
        let terms = order.payment_terms.unwrap_or(self.config.payment_terms);
        let mut progress = FulfillmentProgress::new(
            order.id,
            terms.installments.max(1),
            order.requires_production,
        );

        progress.reservations = self
            .reservations
            .reservations_for_origin(OriginType::SalesOrder, order.id.as_i64())
            .await?
            .into_iter()
            .filter(|r| r.status != ReservationStatus::Cancelled)
            .collect();

        progress.invoice = self
            .invoicing
            .invoices_for_order(order.id)
            .await?
            .into_iter()
            .find(|i| !i.is_cancelled());

        let mut receivables: Vec<_> = self
            .finance
            .receivables_for_order(order.id)
            .await?
            .into_iter()
            .filter(|r| r.status != ReceivableStatus::Cancelled)
            .collect();
        receivables.sort_by_key(|r| r.installment);
        progress.receivables = receivables;

        if order.requires_production {
            progress.production_order = self
                .production
                .production_orders_for_order(order.id)
                .await?
                .into_iter()
                .find(|p| p.status != ProductionStatus::Cancelled);
        }

        progress.refresh_state();
        if progress.state != FulfillmentState::ApprovedNotReserved {
            tracing::info!(order_id = %order.id, state = %progress.state, "resuming fulfillment");
        }
        Ok(progress)
    }

    /// Checks every permission the remaining steps need before any of them
    /// runs.
    fn authorize_pipeline(&self, order: &SalesOrder, progress: &FulfillmentProgress) -> Result<()> {
        if (progress.reservations.is_empty() && progress.invoice.is_none())
            || progress.has_expiring_reservations()
        {
            self.authorize(modules::INVENTORY, actions::RESERVE)?;
        }
        if progress.invoice.is_none() {
            self.authorize(modules::INVOICING, actions::CREATE)?;
        }
        if progress.receivables.len() < progress.expected_installments as usize {
            self.authorize(modules::FINANCE, actions::CREATE)?;
        }
        if order.requires_production && progress.production_order.is_none() {
            self.authorize(modules::PRODUCTION, actions::CREATE)?;
        }
        self.authorize(modules::SALES, actions::UPDATE)
    }

    fn authorize(&self, module: &'static str, action: &'static str) -> Result<()> {
        if self
            .permissions
            .is_allowed(&self.config.actor, module, action)
        {
            return Ok(());
        }
        tracing::warn!(actor = %self.config.actor, module, action, "permission denied");
        Err(FulfillmentError::PermissionDenied {
            actor: self.config.actor.clone(),
            module,
            action,
        })
    }

    /// Releases the order's reservations after a failed invoice.
    async fn release_stock(
        &self,
        order: &SalesOrder,
        progress: &mut FulfillmentProgress,
        reason: &str,
    ) {
        metrics::counter!("fulfillment_compensations_total").increment(1);
        match self
            .reservations
            .cancel_all_for_origin(OriginType::SalesOrder, order.id.as_i64(), reason)
            .await
        {
            Ok(released) => {
                tracing::info!(released = released.len(), "reservations released after failure");
                progress
                    .reservations
                    .retain(|r| r.status == ReservationStatus::Consumed);
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.id,
                    reservations = ?progress.reservation_ids(),
                    error = %e,
                    "failed to release reservations"
                );
            }
        }
    }

    /// Writes the references created so far to Sales. Failures are logged;
    /// the final status sync repeats the write.
    async fn sync_partial(&self, order: &SalesOrder, progress: &FulfillmentProgress) {
        if !matches!(
            order.status,
            SalesOrderStatus::Approved | SalesOrderStatus::Invoiced
        ) {
            return;
        }
        let update = StatusUpdate::new(SalesOrderStatus::Invoiced, progress.links());
        if let Err(e) = self.sales.update_status(order.id, &update).await {
            tracing::warn!(order_id = %order.id, error = %e, "failed to sync partial references");
        }
    }

    fn step_failed(
        &self,
        step: &'static str,
        cause: impl Into<StepCause>,
        progress: &mut FulfillmentProgress,
    ) -> FulfillmentError {
        let state = progress.refresh_state();
        FulfillmentError::StepFailed {
            order_id: progress.order_id,
            step,
            state,
            source: cause.into(),
            progress: Box::new(progress.clone()),
        }
    }

    fn reversal_failed(
        &self,
        step: &'static str,
        cause: impl Into<StepCause>,
        progress: &mut FulfillmentProgress,
    ) -> FulfillmentError {
        progress.state = FulfillmentState::ReversalPending;
        let err = FulfillmentError::StepFailed {
            order_id: progress.order_id,
            step,
            state: progress.state,
            source: cause.into(),
            progress: Box::new(progress.clone()),
        };
        tracing::warn!(order_id = %progress.order_id, step, error = %err, "reversal stopped");
        err
    }
}

fn is_reversible(order: &SalesOrder, progress: &FulfillmentProgress) -> bool {
    match order.status {
        SalesOrderStatus::Draft | SalesOrderStatus::Cancelled => false,
        SalesOrderStatus::Approved => progress.state.can_reverse(),
        _ => true,
    }
}

/// Metrics label for the step a failed run stopped at.
fn failed_step(error: &FulfillmentError) -> &'static str {
    match error {
        FulfillmentError::StepFailed { step, .. } => *step,
        FulfillmentError::NotFulfillable { .. } => steps::STEP_VALIDATE,
        FulfillmentError::InsufficientStock { .. } => steps::STEP_CHECK_AVAILABILITY,
        FulfillmentError::PermissionDenied { .. } => "permission",
        _ => "load",
    }
}
