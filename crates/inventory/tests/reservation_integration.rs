//! Integration tests for reservation management.
//!
//! These tests drive the manager and sweeper together against the in-memory
//! ledger and check the ledger invariants after every scenario.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use inventory::{
    ExpirationSweeper, InventoryError, ReservationLine, ReservationManager, ReserveRequest,
};
use ledger::{
    Availability, InMemoryLedgerStore, LedgerEntry, LedgerError, LedgerStore, LedgerStoreExt,
    MaterialCode, NewMaterial, NewReservation, OrderId, Origin, OriginType, Reservation,
    ReservationId, ReservationStatus, StockMovement, Transition, TransitionOutcome,
};
use rust_decimal::Decimal;

async fn create_manager(stock: &[(&str, i64)]) -> ReservationManager<InMemoryLedgerStore> {
    let store = InMemoryLedgerStore::new();
    for (code, physical) in stock {
        store
            .register_material(NewMaterial::new(*code, Decimal::from(*physical)))
            .await
            .unwrap();
    }
    ReservationManager::new(store)
}

fn for_order(code: &str, quantity: i64, order: i64) -> ReserveRequest {
    ReserveRequest::new(
        code,
        Decimal::from(quantity),
        Origin::sales_order(OrderId::new(order)),
    )
}

async fn assert_consistent(manager: &ReservationManager<InMemoryLedgerStore>, code: &str) {
    let report = manager
        .store()
        .verify_material(&MaterialCode::new(code))
        .await
        .unwrap();
    assert!(report.is_consistent(), "inconsistent ledger: {report:?}");
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn reserve_reject_consume_alu_001() {
        let manager = create_manager(&[("ALU-001", 100)]).await;
        let code = MaterialCode::new("ALU-001");

        let first = manager.reserve(for_order("ALU-001", 30, 500)).await.unwrap();
        assert_eq!(
            manager.availability(&code).await.unwrap().available,
            Decimal::from(70)
        );

        let rejected = manager.reserve(for_order("ALU-001", 80, 501)).await;
        assert!(matches!(
            rejected,
            Err(InventoryError::InsufficientStock { available, .. }) if available == Decimal::from(70)
        ));
        assert_eq!(
            manager.availability(&code).await.unwrap().available,
            Decimal::from(70)
        );

        manager.consume(first.id).await.unwrap();
        let availability = manager.availability(&code).await.unwrap();
        assert_eq!(availability.reserved, Decimal::ZERO);
        assert_eq!(availability.available, Decimal::from(100));
        assert_eq!(availability.physical, Decimal::from(100));

        assert_consistent(&manager, "ALU-001").await;
    }

    #[tokio::test]
    async fn expiration_returns_exact_quantity() {
        let manager = create_manager(&[("CAB-010", 40)]).await;
        let code = MaterialCode::new("CAB-010");
        let now = Utc::now();

        manager
            .reserve(for_order("CAB-010", 12, 1).expires_at(now - Duration::minutes(5)))
            .await
            .unwrap();
        manager
            .reserve(for_order("CAB-010", 7, 2).expires_at(now + Duration::days(3)))
            .await
            .unwrap();
        let before = manager.availability(&code).await.unwrap().available;

        let sweeper = ExpirationSweeper::new(manager.clone(), std::time::Duration::from_secs(60));
        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report.released_count(), 1);

        let after = manager.availability(&code).await.unwrap().available;
        assert_eq!(after - before, Decimal::from(12));
        assert_consistent(&manager, "CAB-010").await;
    }

    #[tokio::test]
    async fn corrections_are_cancel_and_recreate() {
        let manager = create_manager(&[("ALU-001", 100)]).await;
        let original = manager.reserve(for_order("ALU-001", 30, 900)).await.unwrap();

        manager.cancel(original.id, "quantity corrected").await.unwrap();
        manager.reserve(for_order("ALU-001", 25, 900)).await.unwrap();

        let history = manager
            .reservations_for_origin(OriginType::SalesOrder, 900)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, ReservationStatus::Cancelled);
        assert_eq!(history[1].status, ReservationStatus::Active);
        assert_eq!(
            manager
                .availability(&MaterialCode::new("ALU-001"))
                .await
                .unwrap()
                .reserved,
            Decimal::from(25)
        );
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_requests_of_three_against_five() {
        for _ in 0..50 {
            let manager = create_manager(&[("ALU-001", 5)]).await;

            let a = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.reserve(for_order("ALU-001", 3, 1)).await })
            };
            let b = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.reserve(for_order("ALU-001", 3, 2)).await })
            };
            let results = [a.await.unwrap(), b.await.unwrap()];

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(InventoryError::InsufficientStock { .. }))));
            assert_consistent(&manager, "ALU-001").await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sweep_racing_consume_has_one_winner() {
        let manager = create_manager(&[("ALU-001", 100)]).await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for order in 0..20 {
            let reservation = manager
                .reserve(for_order("ALU-001", 1, order).expires_at(now - Duration::seconds(1)))
                .await
                .unwrap();
            ids.push(reservation.id);
        }

        let sweeper = ExpirationSweeper::new(manager.clone(), std::time::Duration::from_secs(60));
        let consumer = {
            let manager = manager.clone();
            let ids = ids.clone();
            tokio::spawn(async move {
                let mut consumed = 0;
                for id in ids {
                    if manager.consume(id).await.is_ok() {
                        consumed += 1;
                    }
                }
                consumed
            })
        };
        let report = sweeper.sweep(now).await.unwrap();
        let consumed = consumer.await.unwrap();

        assert_eq!(report.released_count() + consumed, ids.len());
        assert!(report.failures.is_empty());
        assert_eq!(
            manager
                .availability(&MaterialCode::new("ALU-001"))
                .await
                .unwrap()
                .reserved,
            Decimal::ZERO
        );
        assert_consistent(&manager, "ALU-001").await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_materials_reserve_in_parallel() {
        let codes = ["M-1", "M-2", "M-3", "M-4"];
        let stock: Vec<_> = codes.iter().map(|c| (*c, 100)).collect();
        let manager = create_manager(&stock).await;

        let mut handles = Vec::new();
        for code in codes {
            for order in 0..25 {
                let manager = manager.clone();
                handles.push(tokio::spawn(async move {
                    manager.reserve(for_order(code, 4, order)).await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for code in codes {
            let availability = manager
                .availability(&MaterialCode::new(code))
                .await
                .unwrap();
            assert_eq!(availability.available, Decimal::ZERO);
            assert_consistent(&manager, code).await;
        }
    }
}

mod batches {
    use super::*;

    #[tokio::test]
    async fn shortages_list_every_short_line() {
        let manager = create_manager(&[("ALU-001", 10), ("CAB-010", 1), ("PER-200", 50)]).await;
        let lines = vec![
            ReservationLine::new("ALU-001", Decimal::from(11)),
            ReservationLine::new("CAB-010", Decimal::from(4)),
            ReservationLine::new("PER-200", Decimal::from(5)),
        ];

        let shortages = manager.check_availability(&lines).await.unwrap();
        let short: Vec<_> = shortages
            .iter()
            .map(|s| (s.material_code.to_string(), s.missing))
            .collect();
        assert_eq!(
            short,
            vec![
                ("ALU-001".to_string(), Decimal::from(1)),
                ("CAB-010".to_string(), Decimal::from(3)),
            ]
        );
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_trace_in_ledger() {
        let manager = create_manager(&[("ALU-001", 10), ("CAB-010", 10)]).await;
        let lines = vec![
            ReservationLine::new("ALU-001", Decimal::from(3)),
            ReservationLine::new("CAB-010", Decimal::from(3)),
            ReservationLine::new("MISSING", Decimal::from(1)),
        ];

        let result = manager
            .reserve_all(&lines, Origin::sales_order(OrderId::new(77)), Some("tester"), None)
            .await;
        assert!(matches!(result, Err(InventoryError::MaterialNotFound(_))));

        for code in ["ALU-001", "CAB-010"] {
            let availability = manager
                .availability(&MaterialCode::new(code))
                .await
                .unwrap();
            assert_eq!(availability.reserved, Decimal::ZERO);
            assert_consistent(&manager, code).await;
        }
    }
}

mod sweeper_failures {
    use super::*;

    /// In-memory ledger that refuses to transition one reservation.
    #[derive(Clone)]
    struct FailingStore {
        inner: InMemoryLedgerStore,
        broken: ReservationId,
    }

    #[async_trait]
    impl LedgerStore for FailingStore {
        async fn register_material(&self, material: NewMaterial) -> ledger::Result<LedgerEntry> {
            self.inner.register_material(material).await
        }

        async fn get_entry(&self, material_code: &MaterialCode) -> ledger::Result<Option<LedgerEntry>> {
            self.inner.get_entry(material_code).await
        }

        async fn list_entries(&self) -> ledger::Result<Vec<LedgerEntry>> {
            self.inner.list_entries().await
        }

        async fn adjust_physical(
            &self,
            material_code: &MaterialCode,
            delta: Decimal,
            note: Option<String>,
        ) -> ledger::Result<LedgerEntry> {
            self.inner.adjust_physical(material_code, delta, note).await
        }

        async fn adjust_reserved(
            &self,
            material_code: &MaterialCode,
            delta: Decimal,
        ) -> ledger::Result<LedgerEntry> {
            self.inner.adjust_reserved(material_code, delta).await
        }

        async fn create_reservation(&self, reservation: NewReservation) -> ledger::Result<Reservation> {
            self.inner.create_reservation(reservation).await
        }

        async fn transition_reservation(
            &self,
            reservation_id: ReservationId,
            transition: Transition,
        ) -> ledger::Result<TransitionOutcome> {
            if reservation_id == self.broken {
                return Err(LedgerError::Corrupt(format!(
                    "reservation {reservation_id} is unreadable"
                )));
            }
            self.inner
                .transition_reservation(reservation_id, transition)
                .await
        }

        async fn get_reservation(
            &self,
            reservation_id: ReservationId,
        ) -> ledger::Result<Option<Reservation>> {
            self.inner.get_reservation(reservation_id).await
        }

        async fn list_active(&self, material_code: &MaterialCode) -> ledger::Result<Vec<Reservation>> {
            self.inner.list_active(material_code).await
        }

        async fn list_expired(&self, now: DateTime<Utc>) -> ledger::Result<Vec<Reservation>> {
            self.inner.list_expired(now).await
        }

        async fn find_by_origin(
            &self,
            origin_type: OriginType,
            document_id: i64,
        ) -> ledger::Result<Vec<Reservation>> {
            self.inner.find_by_origin(origin_type, document_id).await
        }

        async fn set_expiry(
            &self,
            reservation_id: ReservationId,
            expires_at: Option<DateTime<Utc>>,
            reason: &str,
        ) -> ledger::Result<Reservation> {
            self.inner.set_expiry(reservation_id, expires_at, reason).await
        }

        async fn movements(&self, material_code: &MaterialCode) -> ledger::Result<Vec<StockMovement>> {
            self.inner.movements(material_code).await
        }
    }

    async fn available(store: &impl LedgerStore, code: &str) -> Availability {
        store.availability(&MaterialCode::new(code)).await.unwrap()
    }

    #[tokio::test]
    async fn one_failed_release_does_not_stop_the_sweep() {
        let inner = InMemoryLedgerStore::new();
        for code in ["ALU-001", "CAB-010"] {
            inner
                .register_material(NewMaterial::new(code, Decimal::from(50)))
                .await
                .unwrap();
        }
        let now = Utc::now();
        let past = now - Duration::minutes(10);

        let setup = ReservationManager::new(inner.clone());
        let first = setup
            .reserve(for_order("ALU-001", 4, 1).expires_at(past))
            .await
            .unwrap();
        let broken = setup
            .reserve(for_order("ALU-001", 6, 2).expires_at(past))
            .await
            .unwrap();
        let third = setup
            .reserve(for_order("CAB-010", 9, 3).expires_at(past))
            .await
            .unwrap();

        let store = FailingStore {
            inner: inner.clone(),
            broken: broken.id,
        };
        let sweeper = ExpirationSweeper::new(
            ReservationManager::new(store.clone()),
            std::time::Duration::from_secs(60),
        );
        let report = sweeper.sweep(now).await.unwrap();

        assert_eq!(report.released_count(), 2);
        let released: Vec<_> = report.released.iter().map(|r| r.id).collect();
        assert!(released.contains(&first.id));
        assert!(released.contains(&third.id));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].reservation_id, broken.id);
        assert_eq!(report.failures[0].material_code, MaterialCode::new("ALU-001"));
        assert!(report.failures[0].error.contains("unreadable"));

        // The failed reservation still holds its stock; the others are back.
        assert_eq!(available(&store, "ALU-001").await.reserved, Decimal::from(6));
        assert_eq!(available(&store, "CAB-010").await.reserved, Decimal::ZERO);
        assert_eq!(
            inner.get_reservation(broken.id).await.unwrap().unwrap().status,
            ReservationStatus::Active
        );
        for code in ["ALU-001", "CAB-010"] {
            let report = inner.verify_material(&MaterialCode::new(code)).await.unwrap();
            assert!(report.is_consistent(), "{code}: {report:?}");
        }
    }
}
