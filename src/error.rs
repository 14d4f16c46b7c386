//! API error taxonomy and its HTTP mapping.
//!
//! Every failure a handler can return is one of these variants; the boundary
//! codes are stable strings the frontend matches on. Internal details are
//! logged server-side and never serialized into a response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or out-of-bounds request input.
    #[error("INVALID_REQUEST")]
    InvalidRequest,
    /// Registration hit an email that already has an account.
    #[error("SIGNAL_COLLISION: USER_EXISTS")]
    UserExists,
    /// Unknown email or bad credential — deliberately the same code for
    /// both, so responses never reveal whether an email is registered.
    #[error("IDENTITY_MISMATCH: ACCESS_DENIED")]
    AccessDenied,
    /// Anything unexpected. The payload is logged, the response is generic.
    #[error("internal server error")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::UserExists => StatusCode::CONFLICT,
            Self::AccessDenied => StatusCode::UNAUTHORIZED,
            Self::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
