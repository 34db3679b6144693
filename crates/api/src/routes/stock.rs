//! Stock position, reservation and movement queries.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use inventory::{StockAlert, evaluate_alerts};
use ledger::{LedgerStore, MaterialCode, Reservation, StockMovement};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub material_code: MaterialCode,
    pub physical: Decimal,
    pub reserved: Decimal,
    /// Never below zero; see `inconsistent`.
    pub available: Decimal,
    /// Set when the ledger holds a negative availability.
    pub inconsistent: bool,
}

/// GET /stock/{code}: physical, reserved and available quantities.
#[tracing::instrument(skip(state))]
pub async fn availability<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(code): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let availability = state
        .reservations
        .availability(&MaterialCode::new(code))
        .await?;

    let inconsistent = availability.available < Decimal::ZERO;
    if inconsistent {
        metrics::counter!("ledger_inconsistencies_total").increment(1);
        tracing::error!(
            material = %availability.material_code,
            physical = %availability.physical,
            reserved = %availability.reserved,
            available = %availability.available,
            "negative availability in ledger"
        );
    }

    Ok(Json(StockResponse {
        material_code: availability.material_code,
        physical: availability.physical,
        reserved: availability.reserved,
        available: availability.available.max(Decimal::ZERO),
        inconsistent,
    }))
}

/// GET /stock/{code}/reservations: active reservations, oldest first.
#[tracing::instrument(skip(state))]
pub async fn reservations<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(code): Path<String>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    let code = MaterialCode::new(code);
    // Distinguish an unknown material from one with nothing reserved.
    state.reservations.availability(&code).await?;
    Ok(Json(state.reservations.list_active(&code).await?))
}

/// GET /stock/{code}/movements: the material's audit trail.
#[tracing::instrument(skip(state))]
pub async fn movements<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(code): Path<String>,
) -> Result<Json<Vec<StockMovement>>, ApiError> {
    let movements = state
        .reservations
        .store()
        .movements(&MaterialCode::new(code))
        .await?;
    Ok(Json(movements))
}

/// GET /stock/alerts: materials at or below their minimum stock.
#[tracing::instrument(skip(state))]
pub async fn alerts<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<StockAlert>>, ApiError> {
    let entries = state.reservations.store().list_entries().await?;
    Ok(Json(evaluate_alerts(&entries)))
}
