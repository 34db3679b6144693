//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::{FulfillmentError, StepCause};
use inventory::InventoryError;
use serde_json::{Map, Value, json};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Reservation or ledger error.
    Inventory(InventoryError),
    /// Fulfillment pipeline error.
    Fulfillment(FulfillmentError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, Map::new()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, Map::new()),
            ApiError::Inventory(err) => {
                (inventory_status(&err), err.to_string(), Map::new())
            }
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, Map::new()),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, %status, "request failed");
        }

        let mut body = details;
        body.insert("error".to_string(), Value::String(message));
        (status, axum::Json(Value::Object(body))).into_response()
    }
}

fn inventory_status(err: &InventoryError) -> StatusCode {
    match err {
        InventoryError::MaterialNotFound(_) | InventoryError::ReservationNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        InventoryError::InvalidQuantity(_) | InventoryError::InvalidExpiry(_) => {
            StatusCode::BAD_REQUEST
        }
        InventoryError::InsufficientStock { .. } | InventoryError::InvalidState { .. } => {
            StatusCode::CONFLICT
        }
        InventoryError::NegativeQuantity { .. } | InventoryError::Ledger(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String, Map<String, Value>) {
    let message = err.to_string();
    let mut details = Map::new();
    let status = match &err {
        FulfillmentError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        FulfillmentError::NotFulfillable { violations, .. } => {
            details.insert("violations".to_string(), json!(violations));
            StatusCode::UNPROCESSABLE_ENTITY
        }
        FulfillmentError::InsufficientStock { shortages, .. } => {
            details.insert("shortages".to_string(), json!(shortages));
            StatusCode::CONFLICT
        }
        FulfillmentError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        FulfillmentError::AlreadySettled { receivable_ids, .. } => {
            details.insert("receivables".to_string(), json!(receivable_ids));
            StatusCode::CONFLICT
        }
        FulfillmentError::NotReversible { status, state, .. } => {
            details.insert("status".to_string(), json!(status.as_str()));
            details.insert("state".to_string(), json!(state));
            StatusCode::CONFLICT
        }
        FulfillmentError::StepFailed {
            step,
            state,
            source,
            progress,
            ..
        } => {
            details.insert("step".to_string(), json!(step));
            details.insert("state".to_string(), json!(state));
            details.insert("retryable".to_string(), json!(source.is_retryable()));
            details.insert("progress".to_string(), json!(progress));
            match source {
                StepCause::Gateway(_) => StatusCode::BAD_GATEWAY,
                StepCause::Inventory(e) => inventory_status(e),
            }
        }
        FulfillmentError::Gateway(_) => StatusCode::BAD_GATEWAY,
        FulfillmentError::Inventory(e) => inventory_status(e),
    };
    (status, message, details)
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<ledger::LedgerError> for ApiError {
    fn from(err: ledger::LedgerError) -> Self {
        ApiError::Inventory(err.into())
    }
}
