//! Order fulfillment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use fulfillment::{FulfillmentProgress, ProductionStatus, SalesOrderStatus};
use ledger::{LedgerStore, Reservation};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CancelFulfillmentRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ProductionStatusRequest {
    pub status: ProductionStatus,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct ShipmentResponse {
    pub order_id: OrderId,
    pub consumed: Vec<Reservation>,
}

#[derive(Debug, Serialize)]
pub struct ProductionStatusResponse {
    pub order_id: OrderId,
    pub production_status: ProductionStatus,
    /// `None` when the production status is not reported to Sales.
    pub sales_status: Option<SalesOrderStatus>,
}

// -- Handlers --

/// POST /orders/{id}/fulfill: run (or resume) the fulfillment pipeline.
#[tracing::instrument(skip(state))]
pub async fn fulfill<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<FulfillmentProgress>, ApiError> {
    Ok(Json(state.orchestrator.fulfill(OrderId::new(id)).await?))
}

/// GET /orders/{id}/fulfillment: the documents fulfillment created so far.
#[tracing::instrument(skip(state))]
pub async fn progress<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<FulfillmentProgress>, ApiError> {
    Ok(Json(state.orchestrator.progress(OrderId::new(id)).await?))
}

/// POST /orders/{id}/cancel-fulfillment: reverse a fulfillment.
#[tracing::instrument(skip(state, req))]
pub async fn cancel_fulfillment<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
    Json(req): Json<CancelFulfillmentRequest>,
) -> Result<Json<FulfillmentProgress>, ApiError> {
    if req.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason must not be empty".to_string()));
    }
    let progress = state
        .orchestrator
        .cancel_fulfillment(OrderId::new(id), &req.reason)
        .await?;
    Ok(Json(progress))
}

/// POST /orders/{id}/ship: consume the order's reservations.
#[tracing::instrument(skip(state))]
pub async fn ship<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<ShipmentResponse>, ApiError> {
    let order_id = OrderId::new(id);
    let consumed = state.orchestrator.confirm_shipment(order_id).await?;
    Ok(Json(ShipmentResponse { order_id, consumed }))
}

/// POST /orders/{id}/production-status: report shop-floor progress to Sales.
#[tracing::instrument(skip(state, req), fields(status = %req.status))]
pub async fn production_status<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
    Json(req): Json<ProductionStatusRequest>,
) -> Result<Json<ProductionStatusResponse>, ApiError> {
    let order_id = OrderId::new(id);
    let sales_status = state
        .orchestrator
        .sync_production_progress(order_id, req.status)
        .await?;
    Ok(Json(ProductionStatusResponse {
        order_id,
        production_status: req.status,
        sales_status,
    }))
}
