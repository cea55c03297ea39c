// ---------------------------------------------------------------------------
// handlers/health.rs: GET /health, GET /health/servers
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::registry::{BackendHealth, HealthStatus};
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub servers: BTreeMap<String, BackendHealth>,
    pub version: String,
    pub uptime_seconds: u64,
    pub ready: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OverallHealth {
    pub status: HealthStatus,
    pub healthy: usize,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetail {
    pub base_url: String,
    pub health: BackendHealth,
    /// Namespaces this backend declares (or its own id before discovery).
    pub namespaces: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ServersReport {
    pub timestamp: DateTime<Utc>,
    pub overall: OverallHealth,
    pub servers: BTreeMap<String, ServerDetail>,
}

#[utoipa::path(get, path = "/health", tag = "health",
    responses((status = 200, description = "Aggregated gateway health", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.registry.health().await;
    Json(HealthResponse {
        status: report.status,
        servers: report.servers,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        ready: state.is_ready(),
    })
}

#[utoipa::path(get, path = "/health/servers", tag = "health",
    responses((status = 200, description = "Per-backend health detail", body = ServersReport))
)]
pub async fn health_servers(State(state): State<AppState>) -> Json<ServersReport> {
    let backends = state.registry.all().await;
    let report = state.registry.health().await;

    let servers: BTreeMap<String, ServerDetail> = backends
        .into_iter()
        .map(|b| {
            let namespaces = b.effective_capabilities().into_keys().collect();
            (
                b.server_id,
                ServerDetail {
                    base_url: b.base_url,
                    health: b.health,
                    namespaces,
                },
            )
        })
        .collect();

    Json(ServersReport {
        timestamp: Utc::now(),
        overall: OverallHealth {
            status: report.status,
            healthy: servers
                .values()
                .filter(|s| s.health.status == HealthStatus::Ok)
                .count(),
            total: servers.len(),
        },
        servers,
    })
}
