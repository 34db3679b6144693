//! Reservations: holds against available stock.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::movement::MovementKind;
use crate::{LedgerError, MaterialCode, OrderId, ReservationId};

/// The status of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// Active ──┬──► Consumed
///          └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Stock is held; counted in the ledger's reserved quantity.
    #[default]
    Active,

    /// Fulfillment completed; stock was shipped or used (terminal state).
    Consumed,

    /// Demand withdrawn or expired (terminal state).
    Cancelled,
}

impl ReservationStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Consumed | ReservationStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Consumed => "consumed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "consumed" => Ok(ReservationStatus::Consumed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(LedgerError::Corrupt(format!("unknown reservation status '{other}'"))),
        }
    }
}

/// What kind of document demanded the hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginType {
    SalesOrder,
    ProductionOrder,
    Transfer,
}

impl OriginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginType::SalesOrder => "sales_order",
            OriginType::ProductionOrder => "production_order",
            OriginType::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for OriginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OriginType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sales_order" => Ok(OriginType::SalesOrder),
            "production_order" => Ok(OriginType::ProductionOrder),
            "transfer" => Ok(OriginType::Transfer),
            other => Err(LedgerError::Corrupt(format!("unknown origin type '{other}'"))),
        }
    }
}

/// Traceability link back to the demanding document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub origin_type: OriginType,
    pub document_id: i64,
    pub document_number: Option<String>,
}

impl Origin {
    pub fn new(origin_type: OriginType, document_id: i64) -> Self {
        Self {
            origin_type,
            document_id,
            document_number: None,
        }
    }

    /// Origin for a sales order.
    pub fn sales_order(order_id: OrderId) -> Self {
        Self::new(OriginType::SalesOrder, order_id.as_i64())
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.document_number = Some(number.into());
        self
    }
}

/// A hold against a material's available stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub material_code: MaterialCode,
    pub quantity: Decimal,
    #[serde(flatten)]
    pub origin: Origin,
    pub status: ReservationStatus,
    pub requested_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub notes: String,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// True for an active reservation whose deadline lies before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|deadline| deadline < now)
    }

    /// Appends a timestamped line to the audit notes.
    pub fn append_note(&mut self, at: DateTime<Utc>, text: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes
            .push_str(&format!("[{}] {}", at.format("%d/%m/%Y %H:%M"), text));
    }

    /// Moves an active reservation to the transition's target status.
    ///
    /// Returns false and leaves the reservation untouched if it is not
    /// active. The caller pairs a `true` result with the ledger release.
    pub fn apply_transition(&mut self, transition: &Transition, at: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        match transition {
            Transition::Consume => {
                self.status = ReservationStatus::Consumed;
                self.consumed_at = Some(at);
                self.append_note(at, "consumed");
            }
            Transition::Cancel { reason, expired } => {
                self.status = ReservationStatus::Cancelled;
                self.cancelled_at = Some(at);
                let note = if *expired {
                    format!(
                        "[AUTO-CANCELLED] reservation expired at {}",
                        self.expires_at.unwrap_or(at).format("%d/%m/%Y %H:%M")
                    )
                } else {
                    format!("cancelled: {reason}")
                };
                self.append_note(at, &note);
            }
        }
        true
    }

    /// Replaces the deadline of an active reservation and notes why.
    ///
    /// Returns false for terminal reservations and when the deadline is
    /// already the requested one.
    pub fn change_expiry(
        &mut self,
        expires_at: Option<DateTime<Utc>>,
        reason: &str,
        at: DateTime<Utc>,
    ) -> bool {
        if !self.is_active() || self.expires_at == expires_at {
            return false;
        }
        self.expires_at = expires_at;
        let note = match expires_at {
            Some(deadline) => format!(
                "expiry moved to {}: {reason}",
                deadline.format("%d/%m/%Y %H:%M")
            ),
            None => format!("expiry cleared: {reason}"),
        };
        self.append_note(at, &note);
        true
    }
}

/// Request to create an active reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservation {
    pub material_code: MaterialCode,
    pub quantity: Decimal,
    pub origin: Origin,
    pub requested_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl NewReservation {
    pub fn new(material_code: impl Into<MaterialCode>, quantity: Decimal, origin: Origin) -> Self {
        Self {
            material_code: material_code.into(),
            quantity,
            origin,
            requested_by: None,
            expires_at: None,
            note: None,
        }
    }

    pub fn requested_by(mut self, actor: impl Into<String>) -> Self {
        self.requested_by = Some(actor.into());
        self
    }

    pub fn expires_at(mut self, deadline: DateTime<Utc>) -> Self {
        self.expires_at = Some(deadline);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Materializes the active reservation row.
    pub fn into_reservation(self, at: DateTime<Utc>) -> Reservation {
        let mut reservation = Reservation {
            id: ReservationId::new(),
            material_code: self.material_code,
            quantity: self.quantity,
            origin: self.origin,
            status: ReservationStatus::Active,
            requested_by: self.requested_by,
            created_at: at,
            expires_at: self.expires_at,
            consumed_at: None,
            cancelled_at: None,
            notes: String::new(),
        };
        if let Some(note) = self.note {
            reservation.append_note(at, &note);
        }
        reservation
    }
}

/// A transition out of `Active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Consume,
    Cancel { reason: String, expired: bool },
}

impl Transition {
    pub fn cancel(reason: impl Into<String>) -> Self {
        Transition::Cancel {
            reason: reason.into(),
            expired: false,
        }
    }

    pub fn expire(reason: impl Into<String>) -> Self {
        Transition::Cancel {
            reason: reason.into(),
            expired: true,
        }
    }

    pub fn target_status(&self) -> ReservationStatus {
        match self {
            Transition::Consume => ReservationStatus::Consumed,
            Transition::Cancel { .. } => ReservationStatus::Cancelled,
        }
    }

    pub fn movement_kind(&self) -> MovementKind {
        match self {
            Transition::Consume => MovementKind::Consumed,
            Transition::Cancel { expired: true, .. } => MovementKind::Expired,
            Transition::Cancel { expired: false, .. } => MovementKind::Released,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            Transition::Consume => None,
            Transition::Cancel { reason, .. } => Some(reason),
        }
    }
}

/// Result of a transition request.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The reservation left `Active` and the ledger was released.
    Applied(Reservation),
    /// The reservation was already terminal; nothing changed.
    Unchanged(Reservation),
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    pub fn reservation(&self) -> &Reservation {
        match self {
            TransitionOutcome::Applied(r) | TransitionOutcome::Unchanged(r) => r,
        }
    }

    pub fn into_reservation(self) -> Reservation {
        match self {
            TransitionOutcome::Applied(r) | TransitionOutcome::Unchanged(r) => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn active() -> Reservation {
        NewReservation::new(
            "ALU-001",
            Decimal::from(30),
            Origin::sales_order(OrderId::new(500)).with_number("PV-500"),
        )
        .requested_by("user-79")
        .into_reservation(Utc::now())
    }

    #[test]
    fn test_new_reservation_is_active() {
        let reservation = active();
        assert_eq!(reservation.status, ReservationStatus::Active);
        assert!(reservation.consumed_at.is_none());
        assert_eq!(reservation.origin.document_id, 500);
        assert!(reservation.notes.is_empty());
    }

    #[test]
    fn test_consume_stamps_consumed_at() {
        let mut reservation = active();
        assert!(reservation.apply_transition(&Transition::Consume, Utc::now()));
        assert_eq!(reservation.status, ReservationStatus::Consumed);
        assert!(reservation.consumed_at.is_some());
    }

    #[test]
    fn test_terminal_states_do_not_transition() {
        let mut reservation = active();
        reservation.apply_transition(&Transition::cancel("customer withdrew"), Utc::now());
        let snapshot = reservation.clone();

        assert!(!reservation.apply_transition(&Transition::Consume, Utc::now()));
        assert!(!reservation.apply_transition(&Transition::cancel("again"), Utc::now()));
        assert_eq!(reservation, snapshot);
    }

    #[test]
    fn test_cancel_appends_reason_to_notes() {
        let mut reservation = NewReservation::new(
            "ALU-001",
            Decimal::ONE,
            Origin::new(OriginType::Transfer, 7),
        )
        .with_note("initial hold")
        .into_reservation(Utc::now());
        reservation.apply_transition(&Transition::cancel("wrong warehouse"), Utc::now());

        let lines: Vec<&str> = reservation.notes.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("initial hold"));
        assert!(lines[1].ends_with("cancelled: wrong warehouse"));
    }

    #[test]
    fn test_expire_writes_auto_cancel_note() {
        let mut reservation = active();
        reservation.apply_transition(&Transition::expire("expired"), Utc::now());

        assert_eq!(reservation.status, ReservationStatus::Cancelled);
        assert!(reservation.cancelled_at.is_some());
        assert!(reservation.notes.contains("[AUTO-CANCELLED] reservation expired at "));
    }

    #[test]
    fn test_expire_note_records_the_deadline() {
        let deadline = DateTime::parse_from_rfc3339("2026-03-02T08:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut reservation = active();
        reservation.expires_at = Some(deadline);

        let swept_at = deadline + Duration::days(3);
        reservation.apply_transition(&Transition::expire("expired"), swept_at);

        assert!(
            reservation
                .notes
                .ends_with("[AUTO-CANCELLED] reservation expired at 02/03/2026 08:15"),
            "{}",
            reservation.notes
        );
    }

    #[test]
    fn test_change_expiry_only_touches_active_reservations() {
        let now = Utc::now();
        let mut reservation = active();
        reservation.expires_at = Some(now + Duration::days(7));

        assert!(reservation.change_expiry(None, "order invoiced", now));
        assert!(reservation.expires_at.is_none());
        assert!(reservation.notes.ends_with("expiry cleared: order invoiced"));
        assert!(!reservation.change_expiry(None, "again", now));

        reservation.apply_transition(&Transition::Consume, now);
        assert!(!reservation.change_expiry(Some(now), "late", now));
        assert!(reservation.expires_at.is_none());
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let mut reservation = active();
        assert!(!reservation.is_expired(now));

        reservation.expires_at = Some(now - Duration::hours(1));
        assert!(reservation.is_expired(now));

        reservation.apply_transition(&Transition::Consume, now);
        assert!(!reservation.is_expired(now));
    }

    #[test]
    fn test_movement_kinds() {
        assert_eq!(Transition::Consume.movement_kind(), MovementKind::Consumed);
        assert_eq!(Transition::cancel("x").movement_kind(), MovementKind::Released);
        assert_eq!(Transition::expire("expired").movement_kind(), MovementKind::Expired);
    }

    #[test]
    fn test_status_text_roundtrip() {
        for status in [
            ReservationStatus::Active,
            ReservationStatus::Consumed,
            ReservationStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>().unwrap(), status);
        }
        assert!("reserved".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn test_serialization_flattens_origin() {
        let json = serde_json::to_value(active()).unwrap();
        assert_eq!(json["origin_type"], "sales_order");
        assert_eq!(json["document_id"], 500);
        assert_eq!(json["status"], "active");
    }
}
