//! Finance module gateway (accounts receivable).

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{Money, OrderId};
use serde::{Deserialize, Serialize};

use super::http::{GatewayConfig, JsonClient, external_id};
use crate::error::GatewayError;
use crate::permissions::modules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceivableStatus {
    #[serde(rename = "PENDENTE", alias = "pending")]
    Pending,
    #[serde(rename = "PAGO", alias = "RECEBIDO", alias = "paid")]
    Paid,
    #[serde(rename = "CANCELADA", alias = "cancelled")]
    Cancelled,
}

impl ReceivableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceivableStatus::Pending => "pending",
            ReceivableStatus::Paid => "paid",
            ReceivableStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReceivableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request to create one installment receivable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivableRequest {
    #[serde(rename = "descricao")]
    pub description: String,
    #[serde(rename = "valor")]
    pub amount: Money,
    #[serde(rename = "data_vencimento")]
    pub due_date: NaiveDate,
    #[serde(rename = "cliente_id")]
    pub customer_id: i64,
    #[serde(rename = "pedido_id")]
    pub order_id: OrderId,
    #[serde(rename = "nfe_id")]
    pub invoice_id: String,
    #[serde(rename = "numero_nf")]
    pub invoice_number: Option<String>,
    #[serde(rename = "numero_parcela")]
    pub installment: u32,
    #[serde(rename = "total_parcelas")]
    pub total_installments: u32,
    #[serde(rename = "forma_pagamento")]
    pub payment_method: String,
    pub status: ReceivableStatus,
}

/// A receivable as held by the Finance module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receivable {
    #[serde(deserialize_with = "external_id::deserialize")]
    pub id: String,
    #[serde(rename = "pedido_id")]
    pub order_id: OrderId,
    #[serde(rename = "numero_parcela", default = "first_installment")]
    pub installment: u32,
    #[serde(rename = "total_parcelas", default = "first_installment")]
    pub total_installments: u32,
    #[serde(rename = "valor")]
    pub amount: Money,
    #[serde(rename = "data_vencimento")]
    pub due_date: NaiveDate,
    pub status: ReceivableStatus,
}

fn first_installment() -> u32 {
    1
}

/// Partial update of a receivable. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceivableUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReceivableStatus>,
    #[serde(rename = "observacoes", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ReceivableUpdate {
    /// Cancels a receivable, recording the reason.
    pub fn cancel(reason: &str) -> Self {
        Self {
            status: Some(ReceivableStatus::Cancelled),
            notes: Some(format!("Cancelled: {reason}")),
        }
    }
}

/// Creates and updates receivables.
#[async_trait]
pub trait FinanceGateway: Send + Sync {
    async fn create_receivable(
        &self,
        request: &ReceivableRequest,
    ) -> Result<Receivable, GatewayError>;

    /// Every receivable of the order, cancelled ones included.
    async fn receivables_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<Receivable>, GatewayError>;

    async fn update_receivable(
        &self,
        receivable_id: &str,
        update: &ReceivableUpdate,
    ) -> Result<(), GatewayError>;
}

#[async_trait]
impl<T: FinanceGateway + ?Sized> FinanceGateway for Arc<T> {
    async fn create_receivable(
        &self,
        request: &ReceivableRequest,
    ) -> Result<Receivable, GatewayError> {
        (**self).create_receivable(request).await
    }

    async fn receivables_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<Receivable>, GatewayError> {
        (**self).receivables_for_order(order_id).await
    }

    async fn update_receivable(
        &self,
        receivable_id: &str,
        update: &ReceivableUpdate,
    ) -> Result<(), GatewayError> {
        (**self).update_receivable(receivable_id, update).await
    }
}

#[derive(Debug, Default)]
struct InMemoryFinanceState {
    receivables: Vec<(Receivable, Option<String>)>,
    next_id: u32,
    create_calls: usize,
    fail_on_installment: Option<u32>,
    fail_on_update: bool,
}

/// In-memory Finance module for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFinanceGateway {
    state: Arc<RwLock<InMemoryFinanceState>>,
}

impl InMemoryFinanceGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes creation of the given installment number time out until reset
    /// with `None`.
    pub fn set_fail_on_installment(&self, installment: Option<u32>) {
        self.state.write().unwrap().fail_on_installment = installment;
    }

    pub fn set_fail_on_update(&self, fail: bool) {
        self.state.write().unwrap().fail_on_update = fail;
    }

    /// Marks a receivable as paid.
    pub fn mark_paid(&self, receivable_id: &str) {
        let mut state = self.state.write().unwrap();
        if let Some((r, _)) = state.receivables.iter_mut().find(|(r, _)| r.id == receivable_id) {
            r.status = ReceivableStatus::Paid;
        }
    }

    /// Returns the receivables of an order, oldest first.
    pub fn receivables(&self, order_id: OrderId) -> Vec<Receivable> {
        self.state
            .read()
            .unwrap()
            .receivables
            .iter()
            .filter(|(r, _)| r.order_id == order_id)
            .map(|(r, _)| r.clone())
            .collect()
    }

    /// Returns the notes recorded on a receivable.
    pub fn notes(&self, receivable_id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .receivables
            .iter()
            .find(|(r, _)| r.id == receivable_id)
            .and_then(|(_, notes)| notes.clone())
    }

    /// Returns the number of create calls received, failed ones included.
    pub fn create_calls(&self) -> usize {
        self.state.read().unwrap().create_calls
    }
}

#[async_trait]
impl FinanceGateway for InMemoryFinanceGateway {
    async fn create_receivable(
        &self,
        request: &ReceivableRequest,
    ) -> Result<Receivable, GatewayError> {
        let mut state = self.state.write().unwrap();
        state.create_calls += 1;

        if state.fail_on_installment == Some(request.installment) {
            return Err(GatewayError::Timeout {
                module: modules::FINANCE,
                timeout_ms: 10_000,
            });
        }

        state.next_id += 1;
        let receivable = Receivable {
            id: format!("CR-{:04}", state.next_id),
            order_id: request.order_id,
            installment: request.installment,
            total_installments: request.total_installments,
            amount: request.amount,
            due_date: request.due_date,
            status: request.status,
        };
        state.receivables.push((receivable.clone(), None));

        Ok(receivable)
    }

    async fn receivables_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<Receivable>, GatewayError> {
        Ok(self.receivables(order_id))
    }

    async fn update_receivable(
        &self,
        receivable_id: &str,
        update: &ReceivableUpdate,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_update {
            return Err(GatewayError::Unavailable {
                module: modules::FINANCE,
                message: "connection refused".to_string(),
            });
        }

        let (receivable, notes) = state
            .receivables
            .iter_mut()
            .find(|(r, _)| r.id == receivable_id)
            .ok_or_else(|| GatewayError::NotFound {
                module: modules::FINANCE,
                resource: format!("receivable {receivable_id}"),
            })?;
        if let Some(status) = update.status {
            receivable.status = status;
        }
        if let Some(text) = &update.notes {
            *notes = Some(text.clone());
        }
        Ok(())
    }
}

/// Finance module over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFinanceGateway {
    client: JsonClient,
}

impl HttpFinanceGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: JsonClient::new(modules::FINANCE, config)?,
        })
    }
}

#[async_trait]
impl FinanceGateway for HttpFinanceGateway {
    async fn create_receivable(
        &self,
        request: &ReceivableRequest,
    ) -> Result<Receivable, GatewayError> {
        self.client
            .post("/api/financeiro/contas-receber", request)
            .await
    }

    async fn receivables_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<Receivable>, GatewayError> {
        self.client
            .get(
                "/api/financeiro/contas-receber",
                &[("pedido_id", order_id.to_string())],
            )
            .await
    }

    async fn update_receivable(
        &self,
        receivable_id: &str,
        update: &ReceivableUpdate,
    ) -> Result<(), GatewayError> {
        self.client
            .put_ignoring_body(
                &format!("/api/financeiro/contas-receber/{receivable_id}"),
                update,
            )
            .await
    }
}
