// Application state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::GatewayConfig;
use crate::error::RegistryError;
use crate::monitor::HealthMonitor;
use crate::registry::{BackendDescriptor, ServerRegistry};
use crate::router::McpRouter;
use crate::transport::McpTransport;
use crate::workflow::WorkflowEngine;

/// Central application state. Clone-friendly; every shared part is behind an `Arc`.
///
/// The registry is built here and handed to the router, the monitor and the
/// workflow engine explicitly; there is no global instance.
#[derive(Clone)]
pub struct AppState {
    pub registry: ServerRegistry,
    pub router: McpRouter,
    pub workflow: WorkflowEngine,
    pub monitor: HealthMonitor,
    pub config: Arc<GatewayConfig>,
    pub start_time: Instant,
    /// `true` once the startup health wait has finished (or was skipped).
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
        tracing::info!("Gateway marked as READY");
    }
}

impl AppState {
    /// Register every configured backend, in order, and wire the components
    /// around one shared registry and transport.
    pub async fn new(config: GatewayConfig, transport: Arc<dyn McpTransport>) -> Result<Self, RegistryError> {
        let registry = ServerRegistry::new();
        for backend in &config.backends {
            registry
                .register(BackendDescriptor::new(
                    backend.server_id.clone(),
                    backend.base_url.as_str(),
                ))
                .await?;
        }

        let router = McpRouter::new(registry.clone(), transport.clone(), config.retry);
        let workflow = WorkflowEngine::new(router.clone(), config.max_sessions)
            .with_parallel_tests(config.parallel_tests);
        let monitor = HealthMonitor::new(registry.clone(), transport, config.health_interval)
            .with_journal(config.health_log.clone());

        tracing::info!(
            "AppState initialised: {} backends, max {} sessions, retries {}",
            config.backends.len(),
            config.max_sessions,
            config.retry.max_retries
        );

        Ok(Self {
            registry,
            router,
            workflow,
            monitor,
            config: Arc::new(config),
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
        })
    }
}
