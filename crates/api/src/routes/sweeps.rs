//! On-demand expiration sweep.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use inventory::SweepReport;
use ledger::LedgerStore;

use crate::AppState;
use crate::error::ApiError;

/// POST /sweeps: release expired reservations now and return the report.
#[tracing::instrument(skip(state))]
pub async fn run<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(state.sweeper.sweep(Utc::now()).await?))
}
