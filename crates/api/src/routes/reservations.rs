//! Manual reservation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use inventory::ReserveRequest;
use ledger::{LedgerStore, MaterialCode, Origin, OriginType, Reservation, ReservationId};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub material_code: String,
    pub quantity: Decimal,
    pub origin_type: OriginType,
    pub origin_document_id: i64,
    pub origin_document_number: Option<String>,
    pub requested_by: Option<String>,
    /// Relative deadline; ignored when `expires_at` is given.
    pub ttl_hours: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelReservationRequest {
    pub reason: String,
}

// -- Handlers --

/// POST /reservations: hold stock for a document.
#[tracing::instrument(skip(state, req), fields(material = %req.material_code, quantity = %req.quantity))]
pub async fn create<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<Reservation>), ApiError> {
    let mut origin = Origin::new(req.origin_type, req.origin_document_id);
    origin.document_number = req.origin_document_number;

    let mut request = ReserveRequest::new(MaterialCode::new(req.material_code), req.quantity, origin);
    request.requested_by = req.requested_by;
    request.expires_at = req.expires_at;
    request.note = req.note;
    if let Some(hours) = req.ttl_hours {
        if hours <= 0 {
            return Err(ApiError::BadRequest(format!(
                "ttl_hours must be positive, got {hours}"
            )));
        }
        let ttl = Duration::try_hours(hours).ok_or_else(|| {
            ApiError::BadRequest(format!("ttl_hours is out of range, got {hours}"))
        })?;
        request.ttl = Some(ttl);
    }

    let reservation = state.reservations.reserve(request).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// GET /reservations/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    Ok(Json(state.reservations.get(reservation_id).await?))
}

/// POST /reservations/{id}/consume: the reserved stock left the warehouse.
#[tracing::instrument(skip(state))]
pub async fn consume<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    Ok(Json(state.reservations.consume(reservation_id).await?))
}

/// POST /reservations/{id}/cancel: release the hold. Repeating it is a no-op.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelReservationRequest>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    if req.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason must not be empty".to_string()));
    }
    Ok(Json(
        state.reservations.cancel(reservation_id, &req.reason).await?,
    ))
}

fn parse_reservation_id(id: &str) -> Result<ReservationId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid reservation ID: {e}")))?;
    Ok(ReservationId::from_uuid(uuid))
}
