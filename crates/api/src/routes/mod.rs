//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod reservations;
pub mod stock;
pub mod sweeps;
