pub mod assistant;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod monitor;
pub mod registry;
pub mod retry;
pub mod router;
pub mod state;
pub mod transport;
pub mod workflow;

use axum::routing::{get, post};
use axum::Json;
use utoipa::OpenApi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "docgen-gateway",
        description = "MCP gateway: routes namespaced calls to backends and runs workflow sessions"
    ),
    paths(
        handlers::mcp,
        handlers::capabilities,
        handlers::health,
        handlers::health_servers,
    ),
    components(schemas(
        handlers::health::HealthResponse,
        handlers::health::ServersReport,
        handlers::health::ServerDetail,
        handlers::health::OverallHealth,
        registry::BackendHealth,
        registry::HealthStatus,
        registry::NamespaceCapability,
        workflow::Session,
        workflow::SessionSummary,
        workflow::PhaseResult,
        workflow::PhaseName,
        workflow::PhaseStatus,
        workflow::SessionStatus,
    )),
    tags(
        (name = "mcp", description = "Request envelopes and capability discovery"),
        (name = "health", description = "Gateway and backend health"),
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> axum::Router {
    axum::Router::new()
        // MCP
        .route("/mcp", post(handlers::mcp))
        .route("/mcp/capabilities", get(handlers::capabilities))
        // Health
        .route("/health", get(handlers::health))
        .route("/health/servers", get(handlers::health_servers))
        // API docs
        .route("/api-docs/openapi.json", get(openapi_json))
        // Shared state
        .with_state(state)
}
