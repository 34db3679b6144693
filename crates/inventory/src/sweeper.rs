//! Expiration sweeper: releases reservations past their deadline.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledger::{LedgerStore, MaterialCode, Reservation, ReservationId, TransitionOutcome};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;

use crate::alerts::{StockAlert, evaluate_alerts};
use crate::error::Result;
use crate::manager::ReservationManager;

/// Released count and quantity for one material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterialRelease {
    pub count: usize,
    pub quantity: Decimal,
}

/// A reservation the sweep could not release.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub reservation_id: ReservationId,
    pub material_code: MaterialCode,
    pub error: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub swept_at: DateTime<Utc>,
    pub released: Vec<Reservation>,
    pub failures: Vec<SweepFailure>,
    /// Reservations that left `active` between listing and release.
    pub skipped: Vec<ReservationId>,
    pub by_material: BTreeMap<MaterialCode, MaterialRelease>,
    pub alerts: Vec<StockAlert>,
}

impl SweepReport {
    fn new(swept_at: DateTime<Utc>) -> Self {
        Self {
            swept_at,
            released: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            by_material: BTreeMap::new(),
            alerts: Vec::new(),
        }
    }

    fn record_release(&mut self, reservation: Reservation) {
        let summary = self
            .by_material
            .entry(reservation.material_code.clone())
            .or_default();
        summary.count += 1;
        summary.quantity += reservation.quantity;
        self.released.push(reservation);
    }

    pub fn released_count(&self) -> usize {
        self.released.len()
    }
}

/// Periodically cancels active reservations whose `expires_at` has passed.
///
/// Each release goes through the same atomic transition as a manual cancel,
/// so a sweep racing a `consume` on the same reservation resolves to exactly
/// one winner; the sweep records its loss as skipped.
pub struct ExpirationSweeper<S: LedgerStore> {
    manager: ReservationManager<S>,
    interval: Duration,
}

impl<S: LedgerStore> ExpirationSweeper<S> {
    /// Creates a sweeper that runs every `interval` once spawned.
    pub fn new(manager: ReservationManager<S>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Runs one sweep over reservations that expired before `now`.
    ///
    /// A failing release is recorded and the sweep moves on. Only a failure
    /// to list expired reservations aborts the sweep.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::new(now);
        let expired = self.manager.store().list_expired(now).await?;

        for reservation in expired {
            match self.manager.expire(reservation.id).await {
                Ok(TransitionOutcome::Applied(released)) => report.record_release(released),
                Ok(TransitionOutcome::Unchanged(_)) => report.skipped.push(reservation.id),
                Err(e) => {
                    tracing::warn!(
                        reservation = %reservation.id,
                        material = %reservation.material_code,
                        error = %e,
                        "failed to release expired reservation"
                    );
                    report.failures.push(SweepFailure {
                        reservation_id: reservation.id,
                        material_code: reservation.material_code.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        metrics::counter!("sweeper_runs_total").increment(1);
        metrics::counter!("sweeper_released_total").increment(report.released.len() as u64);
        metrics::counter!("sweeper_failures_total").increment(report.failures.len() as u64);

        for (material, summary) in &report.by_material {
            tracing::info!(
                %material,
                count = summary.count,
                quantity = %summary.quantity,
                "released expired reservations"
            );
        }

        match self.manager.store().list_entries().await {
            Ok(entries) => report.alerts = evaluate_alerts(&entries),
            Err(e) => tracing::warn!(error = %e, "skipping low-stock evaluation"),
        }
        for alert in &report.alerts {
            tracing::warn!(
                material = %alert.material_code,
                level = %alert.level,
                available = %alert.available,
                minimum = %alert.minimum_stock,
                suggested_purchase = %alert.suggested_purchase,
                "low stock"
            );
        }

        tracing::info!(
            released = report.released.len(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            alerts = report.alerts.len(),
            "expiration sweep finished"
        );
        Ok(report)
    }

    /// Sweeps on every tick until `shutdown` flips to true or its sender is
    /// dropped. The first sweep runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "expiration sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        tracing::error!(error = %e, "expiration sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("expiration sweeper stopped");
    }
}

impl<S: LedgerStore + 'static> ExpirationSweeper<S> {
    /// Spawns [`ExpirationSweeper::run`] on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ReserveRequest;
    use chrono::Duration as ChronoDuration;
    use ledger::{
        InMemoryLedgerStore, LedgerStoreExt, MovementKind, NewMaterial, OrderId, Origin,
        ReservationStatus,
    };

    async fn setup() -> ReservationManager<InMemoryLedgerStore> {
        let store = InMemoryLedgerStore::new();
        store
            .register_material(
                NewMaterial::new("ALU-001", Decimal::from(100))
                    .with_stock_limits(Decimal::from(80), None),
            )
            .await
            .unwrap();
        store
            .register_material(NewMaterial::new("CAB-010", Decimal::from(50)))
            .await
            .unwrap();
        ReservationManager::new(store)
    }

    fn request(code: &str, quantity: i64, expires_at: DateTime<Utc>) -> ReserveRequest {
        ReserveRequest::new(code, Decimal::from(quantity), Origin::sales_order(OrderId::new(1)))
            .expires_at(expires_at)
    }

    #[tokio::test]
    async fn test_sweep_releases_only_expired() {
        let manager = setup().await;
        let now = Utc::now();
        let stale = manager
            .reserve(request("ALU-001", 30, now - ChronoDuration::hours(1)))
            .await
            .unwrap();
        let fresh = manager
            .reserve(request("ALU-001", 10, now + ChronoDuration::days(1)))
            .await
            .unwrap();
        manager
            .reserve(request("CAB-010", 5, now - ChronoDuration::days(2)))
            .await
            .unwrap();

        let sweeper = ExpirationSweeper::new(manager.clone(), Duration::from_secs(3600));
        let report = sweeper.sweep(now).await.unwrap();

        assert_eq!(report.released_count(), 2);
        assert!(report.failures.is_empty());
        assert_eq!(
            report.by_material[&MaterialCode::new("ALU-001")],
            MaterialRelease {
                count: 1,
                quantity: Decimal::from(30)
            }
        );

        let released = manager.get(stale.id).await.unwrap();
        assert_eq!(released.status, ReservationStatus::Cancelled);
        assert!(released.notes.contains("[AUTO-CANCELLED]"));
        assert_eq!(manager.get(fresh.id).await.unwrap().status, ReservationStatus::Active);

        let alu = manager.availability(&"ALU-001".into()).await.unwrap();
        assert_eq!(alu.reserved, Decimal::from(10));

        let kinds: Vec<_> = manager
            .store()
            .movements(&"ALU-001".into())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.kind)
            .collect();
        assert!(kinds.contains(&MovementKind::Expired));
    }

    #[tokio::test]
    async fn test_second_sweep_is_empty() {
        let manager = setup().await;
        let now = Utc::now();
        manager
            .reserve(request("ALU-001", 30, now - ChronoDuration::hours(1)))
            .await
            .unwrap();

        let sweeper = ExpirationSweeper::new(manager.clone(), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep(now).await.unwrap().released_count(), 1);
        assert_eq!(sweeper.sweep(now).await.unwrap().released_count(), 0);

        let report = manager
            .store()
            .verify_material(&"ALU-001".into())
            .await
            .unwrap();
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn test_sweep_reports_low_stock() {
        let manager = setup().await;
        let now = Utc::now();
        // Leaves 100 - 40 = 60 available against a minimum of 80.
        manager
            .reserve(request("ALU-001", 40, now + ChronoDuration::days(1)))
            .await
            .unwrap();

        let sweeper = ExpirationSweeper::new(manager, Duration::from_secs(3600));
        let report = sweeper.sweep(now).await.unwrap();

        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].material_code, MaterialCode::new("ALU-001"));
        assert_eq!(report.alerts[0].level, crate::AlertLevel::Low);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let manager = setup().await;
        let sweeper = ExpirationSweeper::new(manager, Duration::from_secs(3600));
        let (tx, rx) = watch::channel(false);

        let handle = sweeper.spawn(rx);
        tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
