//! Fulfillment error types.

use common::OrderId;
use inventory::{InventoryError, Shortage};
use thiserror::Error;

use crate::order::SalesOrderStatus;
use crate::progress::FulfillmentProgress;
use crate::state::FulfillmentState;

/// Errors returned by a module gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The module could not be reached or answered with a server-side
    /// outage status.
    #[error("{module} unavailable: {message}")]
    Unavailable { module: &'static str, message: String },

    /// The call did not finish within the configured timeout.
    #[error("{module} did not answer within {timeout_ms} ms")]
    Timeout { module: &'static str, timeout_ms: u64 },

    /// The module answered and refused the request.
    #[error("{module} rejected the request ({status}): {message}")]
    Rejected {
        module: &'static str,
        status: u16,
        message: String,
    },

    #[error("{module}: {resource} not found")]
    NotFound { module: &'static str, resource: String },

    /// The module answered with a body that could not be read.
    #[error("{module} sent an unreadable response: {message}")]
    Decode { module: &'static str, message: String },
}

impl GatewayError {
    /// Returns true if repeating the call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Unavailable { .. } | GatewayError::Timeout { .. }
        )
    }

    /// Returns the name of the module that failed.
    pub fn module(&self) -> &'static str {
        match self {
            GatewayError::Unavailable { module, .. }
            | GatewayError::Timeout { module, .. }
            | GatewayError::Rejected { module, .. }
            | GatewayError::NotFound { module, .. }
            | GatewayError::Decode { module, .. } => module,
        }
    }
}

/// The underlying failure of a pipeline step.
#[derive(Debug, Error)]
pub enum StepCause {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

impl StepCause {
    pub fn is_retryable(&self) -> bool {
        match self {
            StepCause::Gateway(e) => e.is_retryable(),
            StepCause::Inventory(_) => false,
        }
    }
}

/// Errors that can occur while fulfilling or reversing an order.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order breaks one or more fulfillment rules.
    #[error("Order {order_id} cannot be fulfilled: {}", .violations.join("; "))]
    NotFulfillable {
        order_id: OrderId,
        violations: Vec<String>,
    },

    /// At least one line cannot be covered by available stock.
    #[error("Insufficient stock for order {order_id}: {} line(s) short", .shortages.len())]
    InsufficientStock {
        order_id: OrderId,
        shortages: Vec<Shortage>,
    },

    #[error("{actor} may not {action} on {module}")]
    PermissionDenied {
        actor: String,
        module: &'static str,
        action: &'static str,
    },

    /// A receivable of the order is already paid; nothing was reversed.
    #[error("Order {order_id} has settled receivables: {}", .receivable_ids.join(", "))]
    AlreadySettled {
        order_id: OrderId,
        receivable_ids: Vec<String>,
    },

    /// The order holds nothing a reversal could undo, or its status does
    /// not allow reverting it to `approved`. Nothing was changed.
    #[error("Order {order_id} cannot be reversed (status {status}, state {state})")]
    NotReversible {
        order_id: OrderId,
        status: SalesOrderStatus,
        state: FulfillmentState,
    },

    /// A step failed after earlier steps committed. `state` names what the
    /// order was left with and `progress` lists the surviving documents.
    #[error("Step '{step}' failed for order {order_id} (state {state}): {source}")]
    StepFailed {
        order_id: OrderId,
        step: &'static str,
        state: FulfillmentState,
        #[source]
        source: StepCause,
        progress: Box<FulfillmentProgress>,
    },

    /// Gateway error outside any pipeline step (reading the order).
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Inventory error outside any pipeline step.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
