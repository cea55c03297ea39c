// Background health monitor
//
// Periodically polls every registered backend:
// - GET /health, recording status, latency and consecutive failures
// - GET /mcp/capabilities on success, replacing the backend's namespace map
// - optional JSON-lines journal of each cycle for external monitoring

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::registry::{BackendDescriptor, BackendHealth, GatewayHealth, HealthStatus, ServerRegistry};
use crate::transport::McpTransport;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const WAIT_STEP: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct HealthMonitor {
    registry: ServerRegistry,
    transport: Arc<dyn McpTransport>,
    interval: Duration,
    journal: Option<PathBuf>,
}

impl HealthMonitor {
    pub fn new(registry: ServerRegistry, transport: Arc<dyn McpTransport>, interval: Duration) -> Self {
        Self {
            registry,
            transport,
            interval,
            journal: None,
        }
    }

    pub fn with_journal(mut self, path: Option<PathBuf>) -> Self {
        self.journal = path;
        self
    }

    /// Poll until `cancel` fires. The first cycle runs immediately.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("monitor: started (interval={}s)", self.interval.as_secs());

            loop {
                let report = self.poll_once().await;

                if report.status == HealthStatus::Ok {
                    tracing::debug!("monitor: all {} backends ok", report.servers.len());
                } else {
                    tracing::warn!(
                        "monitor: gateway {:?}, {} of {} backends ok",
                        report.status,
                        report.servers.values().filter(|h| h.status == HealthStatus::Ok).count(),
                        report.servers.len(),
                    );
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }

            tracing::info!("monitor: stopped");
        })
    }

    /// One poll cycle over every backend, concurrently. Returns the
    /// aggregated health after the cycle has been recorded.
    pub async fn poll_once(&self) -> GatewayHealth {
        let backends = self.registry.all().await;
        join_all(backends.iter().map(|b| self.check(b))).await;

        let report = self.registry.health().await;
        if let Some(path) = &self.journal {
            append_journal(path, &report).await;
        }
        report
    }

    /// Wait until every backend reports `ok` or `timeout` elapses. Only
    /// observes the registry; the spawned loop stays the sole writer.
    pub async fn wait_until_healthy(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let step = self.interval.min(WAIT_STEP);

        loop {
            if self.registry.health().await.status == HealthStatus::Ok {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "monitor: backends not healthy after {}s, serving anyway",
                    timeout.as_secs()
                );
                return false;
            }
            tokio::time::sleep(step.min(deadline - now)).await;
        }
    }

    async fn check(&self, backend: &BackendDescriptor) {
        let started = Instant::now();
        let outcome = self.transport.health(backend).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let previous = &backend.health;

        let health = match outcome {
            Ok(_) => {
                if previous.status == HealthStatus::Error {
                    tracing::info!(
                        server = %backend.server_id,
                        "monitor: backend recovered after {} failed checks",
                        previous.consecutive_failures
                    );
                }
                match self.transport.capabilities(backend).await {
                    Ok(caps) if !caps.is_empty() => {
                        self.registry.record_capabilities(&backend.server_id, caps).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(server = %backend.server_id, "monitor: capability discovery failed: {}", e);
                    }
                }
                BackendHealth {
                    status: HealthStatus::Ok,
                    last_checked: Some(Utc::now()),
                    latency_ms: Some(latency_ms),
                    message: "healthy".to_string(),
                    consecutive_failures: 0,
                }
            }
            Err(e) => {
                if previous.status != HealthStatus::Error {
                    tracing::warn!(server = %backend.server_id, "monitor: backend unhealthy: {}", e);
                }
                BackendHealth {
                    status: HealthStatus::Error,
                    last_checked: Some(Utc::now()),
                    latency_ms: None,
                    message: e.to_string(),
                    consecutive_failures: previous.consecutive_failures.saturating_add(1),
                }
            }
        };

        self.registry.record_health(&backend.server_id, health).await;
    }
}

async fn append_journal(path: &Path, report: &GatewayHealth) {
    let line = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "status": report.status,
        "servers": report.servers,
    });

    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!("monitor: failed to append health journal {}: {}", path.display(), e);
    }
}
