// ---------------------------------------------------------------------------
// handlers/: the gateway's HTTP surface
// `/mcp` and `/mcp/capabilities` live in mcp.rs, `/health*` in health.rs.
// ---------------------------------------------------------------------------

// Sub-modules are pub(crate) so utoipa __path_* types are accessible from lib.rs OpenApi derive.
pub(crate) mod health;
pub(crate) mod mcp;

pub use health::{health, health_servers};
pub use mcp::{capabilities, mcp};

// ── utoipa __path_* re-exports ───────────────────────────────────────────────
pub use health::{__path_health, __path_health_servers};
pub use mcp::{__path_capabilities, __path_mcp};

use axum::http::StatusCode;
use axum::Json;

use crate::envelope::{InvalidRequest, RequestId, ResponseEnvelope, RpcError, INVALID_REQUEST, SERVER_ERROR};

// ---------------------------------------------------------------------------
// Errors rendered outside the normal 200 envelope path
// ---------------------------------------------------------------------------

/// Failures that change the HTTP status. The body is still a response
/// envelope so clients parse one shape.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Body is not JSON at all; no id can be recovered.
    #[error("Malformed body: {0}")]
    MalformedBody(String),

    #[error("Invalid envelope: {}", .0.reason)]
    InvalidEnvelope(InvalidRequest),

    #[error("Internal error: {message}")]
    Internal {
        id: Option<RequestId>,
        message: String,
    },
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MalformedBody(_) | ApiError::InvalidEnvelope(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        let envelope = match self {
            ApiError::MalformedBody(reason) => {
                tracing::warn!("mcp: rejected malformed body: {}", reason);
                ResponseEnvelope::failure(
                    None,
                    RpcError::new(INVALID_REQUEST, format!("Invalid request: body is not valid JSON ({reason})")),
                )
            }
            ApiError::InvalidEnvelope(invalid) => {
                tracing::warn!(id = ?invalid.id, "mcp: rejected envelope: {}", invalid.reason);
                invalid.into_response()
            }
            ApiError::Internal { id, message } => {
                // Full detail stays in the log.
                tracing::error!(id = ?id, "mcp: internal error: {}", message);
                ResponseEnvelope::failure(id, RpcError::new(SERVER_ERROR, "Internal server error"))
            }
        };

        (status, Json(envelope)).into_response()
    }
}
