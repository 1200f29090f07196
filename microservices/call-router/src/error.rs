//! Error types for the call router's JSON surfaces
//!
//! Only non-voice failures become JSON errors: auth rejections, rate limits
//! and tenant misconfiguration. Anything reachable from a live caller turns
//! into spoken CXML in the engine instead, never a 5xx.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pbx_core::PbxError;
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Pbx(#[from] PbxError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] pbx_store::StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::Pbx(err) => {
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                // Server-side detail stays in the logs; auth failures say no
                // more than "unauthorized"
                let message = match err {
                    PbxError::Auth(_) => "unauthorized".to_string(),
                    PbxError::Config(_) => {
                        tracing::error!("Tenant misconfiguration: {:?}", err);
                        "Tenant configuration error".to_string()
                    }
                    _ if status.is_server_error() => {
                        tracing::error!("Internal error: {:?}", err);
                        "Internal server error".to_string()
                    }
                    _ => err.to_string(),
                };
                (status, message)
            }
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::Database(_) | Error::Internal(_) => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
