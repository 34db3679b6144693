//! Stock movement audit trail.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reservation::Reservation;
use crate::{LedgerError, MaterialCode, ReservationId};

/// Kind of ledger change recorded in a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// A reservation was created.
    Reserved,
    /// A reservation was consumed.
    Consumed,
    /// A reservation was cancelled on request.
    Released,
    /// A reservation was cancelled by the expiration sweep.
    Expired,
    /// Physical stock increased.
    Received,
    /// Physical stock decreased.
    Shipped,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Reserved => "reserved",
            MovementKind::Consumed => "consumed",
            MovementKind::Released => "released",
            MovementKind::Expired => "expired",
            MovementKind::Received => "received",
            MovementKind::Shipped => "shipped",
        }
    }
}

impl FromStr for MovementKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(MovementKind::Reserved),
            "consumed" => Ok(MovementKind::Consumed),
            "released" => Ok(MovementKind::Released),
            "expired" => Ok(MovementKind::Expired),
            "received" => Ok(MovementKind::Received),
            "shipped" => Ok(MovementKind::Shipped),
            other => Err(LedgerError::Corrupt(format!("unknown movement kind '{other}'"))),
        }
    }
}

/// Append-only record of a ledger change, written in the same atomic step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub material_code: MaterialCode,
    pub kind: MovementKind,
    /// Magnitude of the change; the kind carries the direction.
    pub quantity: Decimal,
    pub reservation_id: Option<ReservationId>,
    pub document_number: Option<String>,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl StockMovement {
    /// Movement for a reservation being created or leaving `Active`.
    pub fn for_reservation(
        kind: MovementKind,
        reservation: &Reservation,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            material_code: reservation.material_code.clone(),
            kind,
            quantity: reservation.quantity,
            reservation_id: Some(reservation.id),
            document_number: reservation.origin.document_number.clone(),
            note: note.map(str::to_string),
            recorded_at: at,
        }
    }

    /// Movement for a physical stock adjustment.
    pub fn physical(
        material_code: MaterialCode,
        delta: Decimal,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let kind = if delta >= Decimal::ZERO {
            MovementKind::Received
        } else {
            MovementKind::Shipped
        };
        Self {
            id: Uuid::new_v4(),
            material_code,
            kind,
            quantity: delta.abs(),
            reservation_id: None,
            document_number: None,
            note,
            recorded_at: at,
        }
    }
}
