//! Progress record of one fulfillment run.

use common::{OrderId, ReservationId};
use ledger::Reservation;
use serde::Serialize;

use crate::gateways::{Invoice, ProductionOrder, Receivable};
use crate::order::DocumentLinks;
use crate::state::FulfillmentState;

/// The side effects that exist for an order and the steps that produced them.
///
/// Rebuilt from the documents linked to the order at the start of every run,
/// so a repeated run sees what an earlier one left behind.
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentProgress {
    pub order_id: OrderId,
    pub state: FulfillmentState,
    pub completed_steps: Vec<&'static str>,
    /// Active or consumed reservations of the order.
    pub reservations: Vec<Reservation>,
    pub invoice: Option<Invoice>,
    /// Receivables that are not cancelled, by installment number.
    pub receivables: Vec<Receivable>,
    pub expected_installments: u32,
    pub production_required: bool,
    pub production_order: Option<ProductionOrder>,
    pub status_synced: bool,
}

impl FulfillmentProgress {
    pub fn new(order_id: OrderId, expected_installments: u32, production_required: bool) -> Self {
        Self {
            order_id,
            state: FulfillmentState::default(),
            completed_steps: Vec::new(),
            reservations: Vec::new(),
            invoice: None,
            receivables: Vec::new(),
            expected_installments,
            production_required,
            production_order: None,
            status_synced: false,
        }
    }

    /// Records a step as done, once.
    pub fn complete_step(&mut self, step: &'static str) {
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
    }

    pub fn is_step_complete(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| *s == step)
    }

    /// Recomputes `state` from the documents held.
    pub fn refresh_state(&mut self) -> FulfillmentState {
        self.state = if self.invoice.is_none() {
            if self.reservations.is_empty() {
                FulfillmentState::ApprovedNotReserved
            } else {
                FulfillmentState::ReservedNotInvoiced
            }
        } else if self.receivables.len() < self.expected_installments as usize {
            FulfillmentState::InvoicedPendingFinance
        } else if self.production_required && self.production_order.is_none() {
            FulfillmentState::InvoicedPendingProduction
        } else if !self.status_synced {
            FulfillmentState::StatusSyncPending
        } else {
            FulfillmentState::Completed
        };
        self.state
    }

    /// Returns true if a receivable exists for installment `number`.
    pub fn has_installment(&self, number: u32) -> bool {
        self.receivables.iter().any(|r| r.installment == number)
    }

    /// Returns true if an active reservation of the order still has a
    /// deadline.
    pub fn has_expiring_reservations(&self) -> bool {
        self.reservations
            .iter()
            .any(|r| r.is_active() && r.expires_at.is_some())
    }

    pub fn reservation_ids(&self) -> Vec<ReservationId> {
        self.reservations.iter().map(|r| r.id).collect()
    }

    /// Document references to write back to Sales.
    pub fn links(&self) -> DocumentLinks {
        DocumentLinks {
            invoice_id: self.invoice.as_ref().map(|i| i.id.clone()),
            invoice_number: self.invoice.as_ref().and_then(|i| i.number.clone()),
            production_order_id: self.production_order.as_ref().map(|p| p.id.clone()),
        }
    }
}
