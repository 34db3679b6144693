//! Shared identifiers and value types.

pub mod types;

pub use types::{MaterialCode, Money, OrderId, ReservationId};
