//! Inventory error types.

use ledger::{LedgerError, MaterialCode, ReservationId, ReservationStatus};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur in reservation management.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Material not found: {0}")]
    MaterialNotFound(MaterialCode),

    #[error("Negative {field} for material {material_code}: adjustment would leave {value}")]
    NegativeQuantity {
        material_code: MaterialCode,
        field: &'static str,
        value: Decimal,
    },

    #[error(
        "Insufficient stock for material {material_code}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        material_code: MaterialCode,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid quantity: {0} (must be greater than 0 with at most 3 decimal places)")]
    InvalidQuantity(Decimal),

    /// The requested deadline cannot be represented.
    #[error("Invalid expiry: {0}")]
    InvalidExpiry(String),

    /// The reservation is not in a status that allows the action.
    #[error("Cannot {action} reservation {reservation_id} in status {status}")]
    InvalidState {
        reservation_id: ReservationId,
        status: ReservationStatus,
        action: &'static str,
    },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Any other ledger failure (storage, corrupt rows).
    #[error("Ledger error: {0}")]
    Ledger(LedgerError),
}

impl From<LedgerError> for InventoryError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::MaterialNotFound(code) => InventoryError::MaterialNotFound(code),
            LedgerError::NegativeQuantity {
                material_code,
                field,
                value,
            } => InventoryError::NegativeQuantity {
                material_code,
                field,
                value,
            },
            LedgerError::InsufficientStock {
                material_code,
                requested,
                available,
            } => InventoryError::InsufficientStock {
                material_code,
                requested,
                available,
            },
            LedgerError::InvalidQuantity(quantity) => InventoryError::InvalidQuantity(quantity),
            LedgerError::ReservationNotFound(id) => InventoryError::ReservationNotFound(id),
            other => InventoryError::Ledger(other),
        }
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
