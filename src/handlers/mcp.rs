// ---------------------------------------------------------------------------
// handlers/mcp.rs: POST /mcp, GET /mcp/capabilities
// ---------------------------------------------------------------------------

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::envelope::{self, ResponseEnvelope};
use crate::registry::CapabilityMap;
use crate::state::AppState;
use crate::workflow::{workflow_capability, WORKFLOW_NAMESPACE};

use super::ApiError;

/// POST /mcp: one request envelope in, one response envelope out.
///
/// Protocol errors are answered with HTTP 200 and an `error` member. Only an
/// unparsable body or envelope (400) and a gateway fault (500) change the status.
#[utoipa::path(post, path = "/mcp", tag = "mcp",
    request_body(content = Value, description = "Request envelope {protocolVersion?, method, params?, id}"),
    responses(
        (status = 200, description = "Response envelope carrying `result` or `error`", body = Value),
        (status = 400, description = "Body or envelope rejected (-32600)", body = Value),
        (status = 500, description = "Internal gateway fault", body = Value)
    )
)]
pub async fn mcp(State(state): State<AppState>, body: Bytes) -> Result<Json<ResponseEnvelope>, ApiError> {
    let raw: Value = serde_json::from_slice(&body).map_err(|e| ApiError::MalformedBody(e.to_string()))?;
    let request = envelope::validate(&raw).map_err(ApiError::InvalidEnvelope)?;

    if request.namespace() != WORKFLOW_NAMESPACE {
        return Ok(Json(state.router.dispatch(request).await));
    }

    tracing::info!(method = %request.method, id = %request.id, "workflow call");
    let id = Some(request.id.clone());
    match state.workflow.handle(&request).await {
        Ok(result) => Ok(Json(ResponseEnvelope::success(id, result))),
        Err(e) if e.is_internal() => Err(ApiError::Internal {
            id,
            message: e.to_string(),
        }),
        Err(e) => Ok(Json(ResponseEnvelope::failure(id, e.into_rpc_error()))),
    }
}

/// GET /mcp/capabilities: merged backend capabilities plus the gateway's own
/// `workflow` namespace.
#[utoipa::path(get, path = "/mcp/capabilities", tag = "mcp",
    responses((status = 200, description = "Namespace → {version, methods}", body = Value))
)]
pub async fn capabilities(State(state): State<AppState>) -> Json<CapabilityMap> {
    let mut merged = state.registry.capabilities().await;
    if merged.contains_key(WORKFLOW_NAMESPACE) {
        tracing::warn!("capabilities: a backend declares the reserved 'workflow' namespace, ignoring it");
    }
    merged.insert(WORKFLOW_NAMESPACE.to_string(), workflow_capability());
    Json(merged)
}
