use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    Availability, LedgerEntry, LedgerError, MaterialCode, NewMaterial, NewReservation, OriginType,
    Reservation, ReservationId, Result, StockMovement, Transition, TransitionOutcome,
};

/// Core trait for ledger store implementations.
///
/// Every mutating method is one atomic step scoped to a single material's
/// ledger row: concurrent callers on the same material are serialized,
/// callers on different materials proceed in parallel. No implementation
/// holds a lock beyond the duration of one call.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates the ledger entry for a new material.
    async fn register_material(&self, material: NewMaterial) -> Result<LedgerEntry>;

    /// Retrieves a ledger entry. Returns None for unknown materials.
    async fn get_entry(&self, material_code: &MaterialCode) -> Result<Option<LedgerEntry>>;

    /// Retrieves all ledger entries ordered by material code.
    async fn list_entries(&self) -> Result<Vec<LedgerEntry>>;

    /// Applies a receiving (positive) or shipping (negative) change to the
    /// physical quantity.
    async fn adjust_physical(
        &self,
        material_code: &MaterialCode,
        delta: Decimal,
        note: Option<String>,
    ) -> Result<LedgerEntry>;

    /// Applies `delta` to the reserved quantity.
    ///
    /// Fails with `MaterialNotFound` or `NegativeQuantity`. The reservation
    /// paths below perform this adjustment themselves; direct calls are for
    /// reconciliation only.
    async fn adjust_reserved(
        &self,
        material_code: &MaterialCode,
        delta: Decimal,
    ) -> Result<LedgerEntry>;

    /// Checks availability and inserts an active reservation as one step.
    ///
    /// Fails with `InsufficientStock` when `available < quantity`.
    async fn create_reservation(&self, reservation: NewReservation) -> Result<Reservation>;

    /// Moves a reservation out of `Active` together with the ledger release.
    ///
    /// A reservation that is already terminal yields
    /// [`TransitionOutcome::Unchanged`] and leaves the ledger alone.
    async fn transition_reservation(
        &self,
        reservation_id: ReservationId,
        transition: Transition,
    ) -> Result<TransitionOutcome>;

    /// Retrieves a reservation by ID.
    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>>;

    /// Active reservations for a material, oldest first.
    async fn list_active(&self, material_code: &MaterialCode) -> Result<Vec<Reservation>>;

    /// Active reservations whose `expires_at` lies before `now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>>;

    /// All reservations (any status) raised by a document, oldest first.
    async fn find_by_origin(
        &self,
        origin_type: OriginType,
        document_id: i64,
    ) -> Result<Vec<Reservation>>;

    /// Replaces the deadline of an active reservation, noting `reason`.
    ///
    /// Terminal reservations are returned unchanged. The ledger quantities
    /// are not touched.
    async fn set_expiry(
        &self,
        reservation_id: ReservationId,
        expires_at: Option<DateTime<Utc>>,
        reason: &str,
    ) -> Result<Reservation>;

    /// Movement history of a material, oldest first.
    async fn movements(&self, material_code: &MaterialCode) -> Result<Vec<StockMovement>>;
}

// Lets a shared `Arc<dyn LedgerStore>` be handed to generic services.
#[async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    async fn register_material(&self, material: NewMaterial) -> Result<LedgerEntry> {
        (**self).register_material(material).await
    }

    async fn get_entry(&self, material_code: &MaterialCode) -> Result<Option<LedgerEntry>> {
        (**self).get_entry(material_code).await
    }

    async fn list_entries(&self) -> Result<Vec<LedgerEntry>> {
        (**self).list_entries().await
    }

    async fn adjust_physical(
        &self,
        material_code: &MaterialCode,
        delta: Decimal,
        note: Option<String>,
    ) -> Result<LedgerEntry> {
        (**self).adjust_physical(material_code, delta, note).await
    }

    async fn adjust_reserved(
        &self,
        material_code: &MaterialCode,
        delta: Decimal,
    ) -> Result<LedgerEntry> {
        (**self).adjust_reserved(material_code, delta).await
    }

    async fn create_reservation(&self, reservation: NewReservation) -> Result<Reservation> {
        (**self).create_reservation(reservation).await
    }

    async fn transition_reservation(
        &self,
        reservation_id: ReservationId,
        transition: Transition,
    ) -> Result<TransitionOutcome> {
        (**self).transition_reservation(reservation_id, transition).await
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        (**self).get_reservation(reservation_id).await
    }

    async fn list_active(&self, material_code: &MaterialCode) -> Result<Vec<Reservation>> {
        (**self).list_active(material_code).await
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>> {
        (**self).list_expired(now).await
    }

    async fn find_by_origin(
        &self,
        origin_type: OriginType,
        document_id: i64,
    ) -> Result<Vec<Reservation>> {
        (**self).find_by_origin(origin_type, document_id).await
    }

    async fn set_expiry(
        &self,
        reservation_id: ReservationId,
        expires_at: Option<DateTime<Utc>>,
        reason: &str,
    ) -> Result<Reservation> {
        (**self).set_expiry(reservation_id, expires_at, reason).await
    }

    async fn movements(&self, material_code: &MaterialCode) -> Result<Vec<StockMovement>> {
        (**self).movements(material_code).await
    }
}

/// Result of cross-checking a ledger entry against its active reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub material_code: MaterialCode,
    pub physical: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
    pub active_sum: Decimal,
    pub active_count: usize,
}

impl ConsistencyReport {
    /// Both ledger invariants hold: availability is derived and the reserved
    /// quantity equals the sum of active holds.
    pub fn is_consistent(&self) -> bool {
        self.available == self.physical - self.reserved && self.reserved == self.active_sum
    }
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Returns (physical, reserved, available) for a material.
    async fn availability(&self, material_code: &MaterialCode) -> Result<Availability> {
        self.get_entry(material_code)
            .await?
            .map(|entry| entry.availability())
            .ok_or_else(|| LedgerError::MaterialNotFound(material_code.clone()))
    }

    /// Active reservations raised by a document.
    async fn active_for_origin(
        &self,
        origin_type: OriginType,
        document_id: i64,
    ) -> Result<Vec<Reservation>> {
        Ok(self
            .find_by_origin(origin_type, document_id)
            .await?
            .into_iter()
            .filter(Reservation::is_active)
            .collect())
    }

    /// Cross-checks the ledger entry against its active reservations.
    async fn verify_material(&self, material_code: &MaterialCode) -> Result<ConsistencyReport> {
        let availability = self.availability(material_code).await?;
        let active = self.list_active(material_code).await?;
        Ok(ConsistencyReport {
            material_code: material_code.clone(),
            physical: availability.physical,
            reserved: availability.reserved,
            available: availability.available,
            active_sum: active.iter().map(|r| r.quantity).sum(),
            active_count: active.len(),
        })
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}

/// Decimal places kept by the `NUMERIC(15, 3)` quantity columns.
pub const QUANTITY_SCALE: u32 = 3;

/// Rejects non-positive reservation quantities, and quantities finer than
/// the stored precision, before any lock is taken.
pub fn validate_new_reservation(reservation: &NewReservation) -> Result<()> {
    let quantity = reservation.quantity;
    if quantity <= Decimal::ZERO || quantity.normalize().scale() > QUANTITY_SCALE {
        return Err(LedgerError::InvalidQuantity(quantity));
    }
    Ok(())
}
