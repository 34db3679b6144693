//! Reservation manager: the single entry point for reservation lifecycle
//! changes.

use chrono::{DateTime, Duration, Utc};
use ledger::{
    Availability, LedgerStore, LedgerStoreExt, MaterialCode, NewReservation, Origin, OriginType,
    Reservation, ReservationId, Transition, TransitionOutcome,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};

/// Request to hold stock of one material.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub material_code: MaterialCode,
    pub quantity: Decimal,
    pub origin: Origin,
    pub requested_by: Option<String>,
    /// Relative deadline; ignored when `expires_at` is set.
    pub ttl: Option<Duration>,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl ReserveRequest {
    pub fn new(material_code: impl Into<MaterialCode>, quantity: Decimal, origin: Origin) -> Self {
        Self {
            material_code: material_code.into(),
            quantity,
            origin,
            requested_by: None,
            ttl: None,
            expires_at: None,
            note: None,
        }
    }

    pub fn requested_by(mut self, actor: impl Into<String>) -> Self {
        self.requested_by = Some(actor.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
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
}

/// One material line of a batch reservation or availability check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub material_code: MaterialCode,
    pub quantity: Decimal,
}

impl ReservationLine {
    pub fn new(material_code: impl Into<MaterialCode>, quantity: Decimal) -> Self {
        Self {
            material_code: material_code.into(),
            quantity,
        }
    }
}

/// A line that cannot be covered by the available stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    pub material_code: MaterialCode,
    pub requested: Decimal,
    pub available: Decimal,
    pub missing: Decimal,
}

/// Manages reservations against a ledger store.
///
/// Every method that moves a reservation out of `active` does so through
/// [`LedgerStore::transition_reservation`], so the status change and the
/// ledger release are always applied together.
#[derive(Clone)]
pub struct ReservationManager<S: LedgerStore> {
    store: S,
    default_ttl: Option<Duration>,
}

impl<S: LedgerStore> ReservationManager<S> {
    /// Creates a new manager over the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            default_ttl: None,
        }
    }

    /// Sets the TTL applied to requests that carry no deadline of their own.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Holds `quantity` of a material for the given origin.
    ///
    /// The availability check and the ledger update happen in one atomic
    /// store call, so two concurrent requests can never both succeed against
    /// stock that only covers one of them.
    #[tracing::instrument(skip(self, request), fields(material = %request.material_code, quantity = %request.quantity))]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation> {
        if request.quantity <= Decimal::ZERO {
            metrics::counter!("reservations_rejected_total", "reason" => "invalid_quantity")
                .increment(1);
            return Err(InventoryError::InvalidQuantity(request.quantity));
        }

        let deadline = match request.expires_at {
            Some(deadline) => Some(deadline),
            None => match request.ttl.or(self.default_ttl) {
                Some(ttl) => Some(deadline_after(Utc::now(), ttl)?),
                None => None,
            },
        };

        let mut new = NewReservation::new(request.material_code, request.quantity, request.origin);
        new.requested_by = request.requested_by;
        new.expires_at = deadline;
        new.note = request.note;

        match self.store.create_reservation(new).await {
            Ok(reservation) => {
                metrics::counter!("reservations_created_total").increment(1);
                tracing::info!(reservation = %reservation.id, "reservation created");
                Ok(reservation)
            }
            Err(e) => {
                let err = InventoryError::from(e);
                if matches!(err, InventoryError::InsufficientStock { .. }) {
                    metrics::counter!("reservations_rejected_total", "reason" => "insufficient_stock")
                        .increment(1);
                }
                Err(err)
            }
        }
    }

    /// Marks an active reservation consumed and releases its hold.
    ///
    /// Fails with [`InventoryError::InvalidState`] if the reservation is
    /// already consumed or cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn consume(&self, reservation_id: ReservationId) -> Result<Reservation> {
        match self
            .store
            .transition_reservation(reservation_id, Transition::Consume)
            .await?
        {
            TransitionOutcome::Applied(reservation) => {
                metrics::counter!("reservations_released_total", "kind" => "consumed").increment(1);
                tracing::info!(material = %reservation.material_code, "reservation consumed");
                Ok(reservation)
            }
            TransitionOutcome::Unchanged(reservation) => Err(InventoryError::InvalidState {
                reservation_id,
                status: reservation.status,
                action: "consume",
            }),
        }
    }

    /// Cancels a reservation.
    ///
    /// Cancelling a reservation that is already terminal succeeds without
    /// touching the ledger and returns it as stored.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, reservation_id: ReservationId, reason: &str) -> Result<Reservation> {
        let outcome = self
            .store
            .transition_reservation(reservation_id, Transition::cancel(reason))
            .await?;

        if outcome.is_applied() {
            metrics::counter!("reservations_released_total", "kind" => "cancelled").increment(1);
            tracing::info!(material = %outcome.reservation().material_code, "reservation cancelled");
        } else {
            tracing::debug!(status = %outcome.reservation().status, "reservation already terminal");
        }
        Ok(outcome.into_reservation())
    }

    /// Cancels a reservation on behalf of the expiration sweep.
    pub(crate) async fn expire(&self, reservation_id: ReservationId) -> Result<TransitionOutcome> {
        let outcome = self
            .store
            .transition_reservation(reservation_id, Transition::expire("expired"))
            .await?;
        if outcome.is_applied() {
            metrics::counter!("reservations_released_total", "kind" => "expired").increment(1);
        }
        Ok(outcome)
    }

    /// Active reservations of a material, oldest first.
    pub async fn list_active(&self, material_code: &MaterialCode) -> Result<Vec<Reservation>> {
        Ok(self.store.list_active(material_code).await?)
    }

    /// Returns (physical, reserved, available) for a material.
    pub async fn availability(&self, material_code: &MaterialCode) -> Result<Availability> {
        Ok(self.store.availability(material_code).await?)
    }

    /// Returns a reservation by ID.
    pub async fn get(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.store
            .get_reservation(reservation_id)
            .await?
            .ok_or(InventoryError::ReservationNotFound(reservation_id))
    }

    /// Checks every line against current availability without reserving.
    ///
    /// Lines for the same material are summed first. Returns one shortage per
    /// material that cannot be covered; an empty result means every line fits.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn check_availability(&self, lines: &[ReservationLine]) -> Result<Vec<Shortage>> {
        let mut shortages = Vec::new();
        for (material_code, requested) in merge_lines(lines) {
            let availability = self.store.availability(&material_code).await?;
            let available = availability.available.max(Decimal::ZERO);
            if available < requested {
                shortages.push(Shortage {
                    material_code,
                    requested,
                    available,
                    missing: requested - available,
                });
            }
        }
        Ok(shortages)
    }

    /// Reserves every line for one origin, or nothing at all.
    ///
    /// If any line fails, the reservations already made for earlier lines
    /// are cancelled before the error is returned.
    #[tracing::instrument(skip(self, lines, origin), fields(origin = %origin.origin_type, document = origin.document_id))]
    pub async fn reserve_all(
        &self,
        lines: &[ReservationLine],
        origin: Origin,
        requested_by: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reservation>> {
        let mut made = Vec::with_capacity(lines.len());

        for line in lines {
            let mut request =
                ReserveRequest::new(line.material_code.clone(), line.quantity, origin.clone());
            request.requested_by = requested_by.map(str::to_string);
            request.expires_at = expires_at;

            match self.reserve(request).await {
                Ok(reservation) => made.push(reservation),
                Err(err) => {
                    tracing::warn!(
                        material = %line.material_code,
                        error = %err,
                        rollback = made.len(),
                        "batch reservation failed, releasing siblings"
                    );
                    let reason = format!("batch rollback: {err}");
                    for reservation in &made {
                        if let Err(e) = self.cancel(reservation.id, &reason).await {
                            tracing::error!(
                                reservation = %reservation.id,
                                error = %e,
                                "failed to release sibling reservation"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }

        Ok(made)
    }

    /// All reservations (any status) raised by a document.
    pub async fn reservations_for_origin(
        &self,
        origin_type: OriginType,
        document_id: i64,
    ) -> Result<Vec<Reservation>> {
        Ok(self.store.find_by_origin(origin_type, document_id).await?)
    }

    /// Cancels every active reservation of a document.
    ///
    /// Returns the reservations this call released.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_all_for_origin(
        &self,
        origin_type: OriginType,
        document_id: i64,
        reason: &str,
    ) -> Result<Vec<Reservation>> {
        let mut released = Vec::new();
        for reservation in self.store.active_for_origin(origin_type, document_id).await? {
            let outcome = self
                .store
                .transition_reservation(reservation.id, Transition::cancel(reason))
                .await?;
            if let TransitionOutcome::Applied(reservation) = outcome {
                metrics::counter!("reservations_released_total", "kind" => "cancelled")
                    .increment(1);
                released.push(reservation);
            }
        }
        Ok(released)
    }

    /// Removes the deadline from every active reservation of a document, so
    /// the expiration sweep leaves them in place until they are consumed or
    /// cancelled.
    ///
    /// Returns the reservations whose deadline was cleared.
    #[tracing::instrument(skip(self))]
    pub async fn keep_until_consumed(
        &self,
        origin_type: OriginType,
        document_id: i64,
        reason: &str,
    ) -> Result<Vec<Reservation>> {
        let mut kept = Vec::new();
        for reservation in self.store.active_for_origin(origin_type, document_id).await? {
            if reservation.expires_at.is_none() {
                continue;
            }
            let reservation = self.store.set_expiry(reservation.id, None, reason).await?;
            if reservation.is_active() && reservation.expires_at.is_none() {
                kept.push(reservation);
            }
        }
        if !kept.is_empty() {
            tracing::info!(count = kept.len(), "reservation deadlines cleared");
        }
        Ok(kept)
    }

    /// Consumes every active reservation of a document.
    ///
    /// Returns the reservations this call consumed. A reservation that turned
    /// terminal concurrently is skipped rather than reported as an error.
    #[tracing::instrument(skip(self))]
    pub async fn consume_all_for_origin(
        &self,
        origin_type: OriginType,
        document_id: i64,
    ) -> Result<Vec<Reservation>> {
        let mut consumed = Vec::new();
        for reservation in self.store.active_for_origin(origin_type, document_id).await? {
            let outcome = self
                .store
                .transition_reservation(reservation.id, Transition::Consume)
                .await?;
            if let TransitionOutcome::Applied(reservation) = outcome {
                metrics::counter!("reservations_released_total", "kind" => "consumed")
                    .increment(1);
                consumed.push(reservation);
            }
        }
        Ok(consumed)
    }
}

/// Adds a TTL to `from`, rejecting deadlines chrono cannot represent.
pub fn deadline_after(from: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    from.checked_add_signed(ttl)
        .ok_or_else(|| InventoryError::InvalidExpiry(format!("ttl of {ttl} is out of range")))
}

/// Sums quantities per material, keeping first-appearance order.
fn merge_lines(lines: &[ReservationLine]) -> Vec<(MaterialCode, Decimal)> {
    let mut merged: Vec<(MaterialCode, Decimal)> = Vec::new();
    for line in lines {
        match merged.iter_mut().find(|(code, _)| *code == line.material_code) {
            Some((_, quantity)) => *quantity += line.quantity,
            None => merged.push((line.material_code.clone(), line.quantity)),
        }
    }
    merged
}
