//! Error types for the Lettermill API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Delivery provider error: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<crate::store::rows::RowError> for ApiError {
    fn from(e: crate::store::rows::RowError) -> Self {
        use crate::store::rows::RowError;
        match e {
            RowError::InvalidIdentifier(name) => {
                ApiError::Validation(format!("invalid identifier: {name:?}"))
            }
            RowError::RowNotFound { table, key } => {
                ApiError::NotFound(format!("row {key:?} in table {table:?}"))
            }
            RowError::Database(e) => ApiError::Database(e),
        }
    }
}

impl From<crate::tracker::TrackerError> for ApiError {
    fn from(e: crate::tracker::TrackerError) -> Self {
        use crate::tracker::TrackerError;
        match e {
            TrackerError::JobNotFound(id) => ApiError::NotFound(format!("email job {id}")),
            TrackerError::InvalidTimestamp(ts) => {
                ApiError::Validation(format!("invalid event timestamp: {ts}"))
            }
            TrackerError::Database(e) => ApiError::Database(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("Not found: {}", what)),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Delivery(msg) => {
                tracing::error!("Delivery provider error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            ApiError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
