//! Inventory ledger and reservation persistence.
//!
//! The ledger keeps one entry per material with its physical, reserved and
//! available quantities. Reservations are holds against a material; every
//! reservation transition is applied together with the matching ledger
//! adjustment in one atomic step of a [`LedgerStore`].

pub mod entry;
pub mod error;
pub mod memory;
pub mod movement;
pub mod postgres;
pub mod reservation;
pub mod store;

pub use common::{MaterialCode, OrderId, ReservationId};
pub use entry::{Availability, LedgerEntry, NewMaterial};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedgerStore;
pub use movement::{MovementKind, StockMovement};
pub use postgres::PostgresLedgerStore;
pub use reservation::{
    NewReservation, Origin, OriginType, Reservation, ReservationStatus, Transition,
    TransitionOutcome,
};
pub use store::{ConsistencyReport, LedgerStore, LedgerStoreExt};
