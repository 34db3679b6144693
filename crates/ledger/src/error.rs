use rust_decimal::Decimal;
use thiserror::Error;

use crate::{MaterialCode, ReservationId};

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The material code has no ledger entry.
    #[error("Material not found: {0}")]
    MaterialNotFound(MaterialCode),

    /// A ledger entry already exists for the material code.
    #[error("Material already registered: {0}")]
    MaterialAlreadyRegistered(MaterialCode),

    /// An adjustment would drive a ledger quantity below zero.
    /// The entry is left unchanged; this signals a caller bug.
    #[error("Negative {field} for material {material_code}: adjustment would leave {value}")]
    NegativeQuantity {
        material_code: MaterialCode,
        field: &'static str,
        value: Decimal,
    },

    /// Not enough available stock to honour a reservation.
    #[error(
        "Insufficient stock for material {material_code}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        material_code: MaterialCode,
        requested: Decimal,
        available: Decimal,
    },

    /// Reservation quantities must be strictly positive with at most three
    /// decimal places.
    #[error("Invalid quantity: {0} (must be greater than 0 with at most 3 decimal places)")]
    InvalidQuantity(Decimal),

    /// No reservation exists with the given ID.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// A stored row could not be mapped back to the domain model.
    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
