use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};

use crate::{
    LedgerEntry, LedgerError, MaterialCode, MovementKind, NewMaterial, NewReservation, OriginType,
    Reservation, ReservationId, Result, StockMovement, Transition, TransitionOutcome,
    store::{LedgerStore, validate_new_reservation},
};

/// One ledger row together with the reservations and movements that belong
/// to it, so a reservation transition and its ledger adjustment share a lock.
#[derive(Debug)]
struct MaterialRow {
    entry: LedgerEntry,
    reservations: Vec<Reservation>,
    movements: Vec<StockMovement>,
}

/// In-memory ledger store.
///
/// Each material row sits behind its own mutex, which plays the role of the
/// row-level lock of the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    rows: Arc<RwLock<HashMap<MaterialCode, Arc<Mutex<MaterialRow>>>>>,
    reservation_index: Arc<RwLock<HashMap<ReservationId, MaterialCode>>>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of materials in the ledger.
    pub async fn material_count(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Returns the number of reservations ever created, in any status.
    pub async fn reservation_count(&self) -> usize {
        self.reservation_index.read().await.len()
    }

    async fn row(&self, material_code: &MaterialCode) -> Result<Arc<Mutex<MaterialRow>>> {
        self.rows
            .read()
            .await
            .get(material_code)
            .cloned()
            .ok_or_else(|| LedgerError::MaterialNotFound(material_code.clone()))
    }

    async fn all_rows(&self) -> Vec<Arc<Mutex<MaterialRow>>> {
        self.rows.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn register_material(&self, material: NewMaterial) -> Result<LedgerEntry> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&material.material_code) {
            return Err(LedgerError::MaterialAlreadyRegistered(material.material_code));
        }

        let code = material.material_code.clone();
        let physical = material.physical_quantity;
        let now = Utc::now();
        let entry = LedgerEntry::register(material, now)?;
        let mut movements = Vec::new();
        if physical > Decimal::ZERO {
            movements.push(StockMovement::physical(
                code.clone(),
                physical,
                Some("opening balance".to_string()),
                now,
            ));
        }

        rows.insert(
            code,
            Arc::new(Mutex::new(MaterialRow {
                entry: entry.clone(),
                reservations: Vec::new(),
                movements,
            })),
        );
        Ok(entry)
    }

    async fn get_entry(&self, material_code: &MaterialCode) -> Result<Option<LedgerEntry>> {
        let row = self.rows.read().await.get(material_code).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.entry.clone())),
            None => Ok(None),
        }
    }

    async fn list_entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        for row in self.all_rows().await {
            entries.push(row.lock().await.entry.clone());
        }
        entries.sort_by(|a, b| a.material_code().cmp(b.material_code()));
        Ok(entries)
    }

    async fn adjust_physical(
        &self,
        material_code: &MaterialCode,
        delta: Decimal,
        note: Option<String>,
    ) -> Result<LedgerEntry> {
        let row = self.row(material_code).await?;
        let mut row = row.lock().await;
        let now = Utc::now();

        row.entry.apply_physical_delta(delta, now)?;
        row.movements
            .push(StockMovement::physical(material_code.clone(), delta, note, now));
        Ok(row.entry.clone())
    }

    async fn adjust_reserved(
        &self,
        material_code: &MaterialCode,
        delta: Decimal,
    ) -> Result<LedgerEntry> {
        let row = self.row(material_code).await?;
        let mut row = row.lock().await;

        row.entry.apply_reserved_delta(delta, Utc::now())?;
        Ok(row.entry.clone())
    }

    async fn create_reservation(&self, reservation: NewReservation) -> Result<Reservation> {
        validate_new_reservation(&reservation)?;

        let row = self.row(&reservation.material_code).await?;
        let mut guard = row.lock().await;
        let now = Utc::now();

        // Check and apply under the same row lock.
        let available = guard.entry.available();
        if available < reservation.quantity {
            return Err(LedgerError::InsufficientStock {
                material_code: reservation.material_code,
                requested: reservation.quantity,
                available,
            });
        }
        guard.entry.apply_reserved_delta(reservation.quantity, now)?;

        let reservation = reservation.into_reservation(now);
        guard.movements.push(StockMovement::for_reservation(
            MovementKind::Reserved,
            &reservation,
            None,
            now,
        ));
        guard.reservations.push(reservation.clone());

        self.reservation_index
            .write()
            .await
            .insert(reservation.id, reservation.material_code.clone());

        Ok(reservation)
    }

    async fn transition_reservation(
        &self,
        reservation_id: ReservationId,
        transition: Transition,
    ) -> Result<TransitionOutcome> {
        let material_code = self
            .reservation_index
            .read()
            .await
            .get(&reservation_id)
            .cloned()
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        let row = self.row(&material_code).await?;
        let mut guard = row.lock().await;
        let now = Utc::now();
        let MaterialRow {
            entry,
            reservations,
            movements,
        } = &mut *guard;

        let reservation = reservations
            .iter_mut()
            .find(|r| r.id == reservation_id)
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        if !reservation.is_active() {
            return Ok(TransitionOutcome::Unchanged(reservation.clone()));
        }

        // Release first: a failing adjustment must leave the reservation active.
        entry.apply_reserved_delta(-reservation.quantity, now)?;
        reservation.apply_transition(&transition, now);
        movements.push(StockMovement::for_reservation(
            transition.movement_kind(),
            reservation,
            transition.note(),
            now,
        ));

        Ok(TransitionOutcome::Applied(reservation.clone()))
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        let material_code = self.reservation_index.read().await.get(&reservation_id).cloned();
        let Some(material_code) = material_code else {
            return Ok(None);
        };
        let row = self.row(&material_code).await?;
        let row = row.lock().await;
        Ok(row.reservations.iter().find(|r| r.id == reservation_id).cloned())
    }

    async fn list_active(&self, material_code: &MaterialCode) -> Result<Vec<Reservation>> {
        let row = self.row(material_code).await?;
        let row = row.lock().await;
        let mut active: Vec<_> = row
            .reservations
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|r| r.created_at);
        Ok(active)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>> {
        let mut expired = Vec::new();
        for row in self.all_rows().await {
            let row = row.lock().await;
            expired.extend(row.reservations.iter().filter(|r| r.is_expired(now)).cloned());
        }
        expired.sort_by_key(|r| (r.expires_at, r.created_at));
        Ok(expired)
    }

    async fn find_by_origin(
        &self,
        origin_type: OriginType,
        document_id: i64,
    ) -> Result<Vec<Reservation>> {
        let mut found = Vec::new();
        for row in self.all_rows().await {
            let row = row.lock().await;
            found.extend(
                row.reservations
                    .iter()
                    .filter(|r| {
                        r.origin.origin_type == origin_type && r.origin.document_id == document_id
                    })
                    .cloned(),
            );
        }
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn set_expiry(
        &self,
        reservation_id: ReservationId,
        expires_at: Option<DateTime<Utc>>,
        reason: &str,
    ) -> Result<Reservation> {
        let material_code = self
            .reservation_index
            .read()
            .await
            .get(&reservation_id)
            .cloned()
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        let row = self.row(&material_code).await?;
        let mut row = row.lock().await;
        let reservation = row
            .reservations
            .iter_mut()
            .find(|r| r.id == reservation_id)
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        reservation.change_expiry(expires_at, reason, Utc::now());
        Ok(reservation.clone())
    }

    async fn movements(&self, material_code: &MaterialCode) -> Result<Vec<StockMovement>> {
        let row = self.row(material_code).await?;
        let row = row.lock().await;
        Ok(row.movements.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LedgerStoreExt, Origin, OrderId, ReservationStatus};
    use chrono::Duration;

    async fn store_with(code: &str, physical: i64) -> InMemoryLedgerStore {
        let store = InMemoryLedgerStore::new();
        store
            .register_material(NewMaterial::new(code, Decimal::from(physical)))
            .await
            .unwrap();
        store
    }

    fn hold(code: &str, quantity: i64, order: i64) -> NewReservation {
        NewReservation::new(
            code,
            Decimal::from(quantity),
            Origin::sales_order(OrderId::new(order)),
        )
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let store = store_with("ALU-001", 100).await;
        let entry = store
            .get_entry(&MaterialCode::new("ALU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.available(), Decimal::from(100));
        assert_eq!(store.material_count().await, 1);
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let store = store_with("ALU-001", 100).await;
        let result = store
            .register_material(NewMaterial::new("ALU-001", Decimal::from(5)))
            .await;
        assert!(matches!(result, Err(LedgerError::MaterialAlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_unknown_material() {
        let store = InMemoryLedgerStore::new();
        let code = MaterialCode::new("NOPE");
        assert!(store.get_entry(&code).await.unwrap().is_none());
        assert!(matches!(
            store.adjust_reserved(&code, Decimal::ONE).await,
            Err(LedgerError::MaterialNotFound(_))
        ));
        assert!(matches!(
            store.create_reservation(hold("NOPE", 1, 1)).await,
            Err(LedgerError::MaterialNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_adjust_reserved_rejects_negative_result() {
        let store = store_with("ALU-001", 10).await;
        let code = MaterialCode::new("ALU-001");
        store.adjust_reserved(&code, Decimal::from(3)).await.unwrap();

        let result = store.adjust_reserved(&code, Decimal::from(-4)).await;
        assert!(matches!(result, Err(LedgerError::NegativeQuantity { .. })));

        let availability = store.availability(&code).await.unwrap();
        assert_eq!(availability.reserved, Decimal::from(3));
        assert_eq!(availability.available, Decimal::from(7));
    }

    #[tokio::test]
    async fn test_create_reservation_updates_ledger() {
        let store = store_with("ALU-001", 100).await;
        let reservation = store.create_reservation(hold("ALU-001", 30, 500)).await.unwrap();

        assert_eq!(reservation.status, ReservationStatus::Active);
        let report = store.verify_material(&reservation.material_code).await.unwrap();
        assert_eq!(report.reserved, Decimal::from(30));
        assert_eq!(report.available, Decimal::from(70));
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_ledger_untouched() {
        let store = store_with("ALU-001", 10).await;
        let result = store.create_reservation(hold("ALU-001", 11, 500)).await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientStock { available, .. }) if available == Decimal::from(10)
        ));
        assert_eq!(store.reservation_count().await, 0);
        let availability = store.availability(&MaterialCode::new("ALU-001")).await.unwrap();
        assert_eq!(availability.reserved, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let store = store_with("ALU-001", 10).await;
        let result = store.create_reservation(hold("ALU-001", 0, 500)).await;
        assert!(matches!(result, Err(LedgerError::InvalidQuantity(_))));
    }

    #[tokio::test]
    async fn test_transition_is_applied_once() {
        let store = store_with("ALU-001", 100).await;
        let reservation = store.create_reservation(hold("ALU-001", 30, 500)).await.unwrap();

        let first = store
            .transition_reservation(reservation.id, Transition::cancel("withdrawn"))
            .await
            .unwrap();
        assert!(first.is_applied());

        let second = store
            .transition_reservation(reservation.id, Transition::Consume)
            .await
            .unwrap();
        assert!(!second.is_applied());
        assert_eq!(second.reservation().status, ReservationStatus::Cancelled);

        let report = store.verify_material(&reservation.material_code).await.unwrap();
        assert_eq!(report.reserved, Decimal::ZERO);
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn test_transition_unknown_reservation() {
        let store = InMemoryLedgerStore::new();
        let result = store
            .transition_reservation(ReservationId::new(), Transition::Consume)
            .await;
        assert!(matches!(result, Err(LedgerError::ReservationNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_active_is_oldest_first() {
        let store = store_with("ALU-001", 100).await;
        let first = store.create_reservation(hold("ALU-001", 1, 1)).await.unwrap();
        let second = store.create_reservation(hold("ALU-001", 2, 2)).await.unwrap();
        let third = store.create_reservation(hold("ALU-001", 3, 3)).await.unwrap();
        store
            .transition_reservation(second.id, Transition::Consume)
            .await
            .unwrap();

        let active = store.list_active(&MaterialCode::new("ALU-001")).await.unwrap();
        let ids: Vec<_> = active.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, third.id]);
    }

    #[tokio::test]
    async fn test_list_expired_and_find_by_origin() {
        let store = store_with("ALU-001", 100).await;
        let now = Utc::now();
        let stale = store
            .create_reservation(hold("ALU-001", 5, 9).expires_at(now - Duration::days(1)))
            .await
            .unwrap();
        store
            .create_reservation(hold("ALU-001", 5, 9).expires_at(now + Duration::days(1)))
            .await
            .unwrap();
        store.create_reservation(hold("ALU-001", 5, 10)).await.unwrap();

        let expired = store.list_expired(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);

        let for_order = store.find_by_origin(OriginType::SalesOrder, 9).await.unwrap();
        assert_eq!(for_order.len(), 2);
        assert!(store
            .find_by_origin(OriginType::Transfer, 9)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cleared_expiry_is_never_swept() {
        let store = store_with("ALU-001", 100).await;
        let now = Utc::now();
        let held = store
            .create_reservation(hold("ALU-001", 5, 9).expires_at(now + Duration::days(1)))
            .await
            .unwrap();

        let kept = store.set_expiry(held.id, None, "order invoiced").await.unwrap();

        assert!(kept.expires_at.is_none());
        assert!(kept.notes.ends_with("expiry cleared: order invoiced"));
        assert!(store.list_expired(now + Duration::days(30)).await.unwrap().is_empty());
        let report = store.verify_material(&MaterialCode::new("ALU-001")).await.unwrap();
        assert_eq!(report.reserved, Decimal::from(5));
    }

    #[tokio::test]
    async fn test_set_expiry_leaves_terminal_reservations_alone() {
        let store = store_with("ALU-001", 100).await;
        let held = store.create_reservation(hold("ALU-001", 5, 9)).await.unwrap();
        store
            .transition_reservation(held.id, Transition::Consume)
            .await
            .unwrap();

        let deadline = Utc::now() + Duration::days(2);
        let after = store.set_expiry(held.id, Some(deadline), "late").await.unwrap();

        assert_eq!(after.status, ReservationStatus::Consumed);
        assert!(after.expires_at.is_none());
        assert!(matches!(
            store.set_expiry(ReservationId::new(), None, "x").await,
            Err(LedgerError::ReservationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_movements_follow_every_change() {
        let store = store_with("ALU-001", 100).await;
        let code = MaterialCode::new("ALU-001");
        let reservation = store.create_reservation(hold("ALU-001", 30, 500)).await.unwrap();
        store
            .transition_reservation(reservation.id, Transition::expire("expired"))
            .await
            .unwrap();
        store
            .adjust_physical(&code, Decimal::from(-10), Some("shipment".into()))
            .await
            .unwrap();

        let kinds: Vec<_> = store
            .movements(&code)
            .await
            .unwrap()
            .iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                MovementKind::Received,
                MovementKind::Reserved,
                MovementKind::Expired,
                MovementKind::Shipped
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversubscribe() {
        let store = store_with("ALU-001", 5).await;

        let mut handles = Vec::new();
        for order in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_reservation(hold("ALU-001", 3, order)).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(LedgerError::InsufficientStock { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(successes, 1);
        let report = store.verify_material(&MaterialCode::new("ALU-001")).await.unwrap();
        assert_eq!(report.reserved, Decimal::from(3));
        assert!(report.is_consistent());
    }
}
