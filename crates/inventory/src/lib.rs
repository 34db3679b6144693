//! Reservation management on top of the inventory ledger.
//!
//! This crate provides:
//! - [`ReservationManager`], the only place reservations are created,
//!   consumed or cancelled
//! - [`ExpirationSweeper`], which releases reservations past their deadline
//! - Low-stock alert evaluation over ledger entries

pub mod alerts;
pub mod error;
pub mod manager;
pub mod sweeper;

pub use alerts::{AlertLevel, StockAlert, evaluate_alerts};
pub use error::{InventoryError, Result};
pub use manager::{ReservationLine, ReservationManager, ReserveRequest, Shortage, deadline_after};
pub use sweeper::{ExpirationSweeper, MaterialRelease, SweepFailure, SweepReport};
