//! Named fulfillment states.

use serde::{Deserialize, Serialize};

/// Where an order stands in the fulfillment pipeline.
///
/// The state is derived from the documents that exist for the order, so it
/// names exactly what a failed run left behind:
/// ```text
/// ApprovedNotReserved ──► ReservedNotInvoiced ──► InvoicedPendingFinance
///        ▲                                               │
///        │                                               ▼
///     Reversed ◄── ReversalPending        InvoicedPendingProduction
///                                                        │
///                                                        ▼
///                          Completed ◄── StatusSyncPending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentState {
    /// Nothing has been done for the order yet.
    #[default]
    ApprovedNotReserved,

    /// Stock is held but no invoice exists.
    ReservedNotInvoiced,

    /// The invoice exists; some installments have no receivable.
    InvoicedPendingFinance,

    /// Invoice and receivables exist; the production order is missing.
    InvoicedPendingProduction,

    /// Every document exists; Sales has not received the final status.
    StatusSyncPending,

    /// Every document exists and Sales carries the final status.
    Completed,

    /// A reversal stopped before every document was cancelled.
    ReversalPending,

    /// The order was reverted to `approved` and its documents cancelled.
    Reversed,
}

impl FulfillmentState {
    /// Returns true if the order holds documents a reversal must undo.
    pub fn can_reverse(&self) -> bool {
        !matches!(
            self,
            FulfillmentState::ApprovedNotReserved | FulfillmentState::Reversed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentState::ApprovedNotReserved => "approved_not_reserved",
            FulfillmentState::ReservedNotInvoiced => "reserved_not_invoiced",
            FulfillmentState::InvoicedPendingFinance => "invoiced_pending_finance",
            FulfillmentState::InvoicedPendingProduction => "invoiced_pending_production",
            FulfillmentState::StatusSyncPending => "status_sync_pending",
            FulfillmentState::Completed => "completed",
            FulfillmentState::ReversalPending => "reversal_pending",
            FulfillmentState::Reversed => "reversed",
        }
    }
}

impl std::fmt::Display for FulfillmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [FulfillmentState; 8] = [
        FulfillmentState::ApprovedNotReserved,
        FulfillmentState::ReservedNotInvoiced,
        FulfillmentState::InvoicedPendingFinance,
        FulfillmentState::InvoicedPendingProduction,
        FulfillmentState::StatusSyncPending,
        FulfillmentState::Completed,
        FulfillmentState::ReversalPending,
        FulfillmentState::Reversed,
    ];

    #[test]
    fn test_default_state_is_approved_not_reserved() {
        assert_eq!(
            FulfillmentState::default(),
            FulfillmentState::ApprovedNotReserved
        );
    }

    #[test]
    fn test_can_reverse() {
        assert!(!FulfillmentState::ApprovedNotReserved.can_reverse());
        assert!(FulfillmentState::ReservedNotInvoiced.can_reverse());
        assert!(FulfillmentState::InvoicedPendingFinance.can_reverse());
        assert!(FulfillmentState::Completed.can_reverse());
        assert!(FulfillmentState::ReversalPending.can_reverse());
        assert!(!FulfillmentState::Reversed.can_reverse());
    }

    #[test]
    fn test_display_matches_serde() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }
}
