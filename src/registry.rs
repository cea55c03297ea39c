//! Server registry: the set of known backends, in registration order.
//!
//! Only the health monitor writes descriptor state (`record_*` are crate-private).
//! The router and the HTTP handlers read snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::error::RegistryError;

// ── Capabilities ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NamespaceCapability {
    pub version: String,
    #[schema(value_type = Vec<String>)]
    pub methods: BTreeSet<String>,
}

impl NamespaceCapability {
    pub fn new<I, S>(version: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: version.into(),
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty method set means "not advertised" and accepts any action.
    pub fn allows(&self, action: &str) -> bool {
        self.methods.is_empty() || self.methods.contains(action)
    }
}

/// Namespace → capability. `BTreeMap` keeps serialized output stable.
pub type CapabilityMap = BTreeMap<String, NamespaceCapability>;

// ── Health ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub status: HealthStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub message: String,
    pub consecutive_failures: u32,
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Degraded,
            last_checked: None,
            latency_ms: None,
            message: "not yet checked".to_string(),
            consecutive_failures: 0,
        }
    }
}

/// Aggregated gateway health: `ok` iff every backend is ok, `error` when none
/// is, `degraded` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub servers: BTreeMap<String, BackendHealth>,
}

pub fn aggregate_status<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> HealthStatus {
    let (mut total, mut healthy) = (0usize, 0usize);
    for s in statuses {
        total += 1;
        if *s == HealthStatus::Ok {
            healthy += 1;
        }
    }
    if healthy == total {
        HealthStatus::Ok
    } else if healthy == 0 {
        HealthStatus::Error
    } else {
        HealthStatus::Degraded
    }
}

// ── Descriptor ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    pub server_id: String,
    pub base_url: String,
    pub capabilities: CapabilityMap,
    pub health: BackendHealth,
}

impl BackendDescriptor {
    pub fn new(server_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            base_url: base_url.into(),
            capabilities: CapabilityMap::new(),
            health: BackendHealth::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityMap) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Advertised capabilities, or (before discovery has succeeded) the
    /// namespace named after the server itself with no method list.
    pub fn effective_capabilities(&self) -> CapabilityMap {
        if !self.capabilities.is_empty() {
            return self.capabilities.clone();
        }
        let mut fallback = CapabilityMap::new();
        fallback.insert(
            self.server_id.clone(),
            NamespaceCapability::new("unknown", Vec::<String>::new()),
        );
        fallback
    }

    /// `{base}/{path}` without doubling the slash.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct ServerRegistry {
    backends: Arc<RwLock<Vec<BackendDescriptor>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, descriptor: BackendDescriptor) -> Result<(), RegistryError> {
        let mut lock = self.backends.write().await;
        if lock.iter().any(|b| b.server_id == descriptor.server_id) {
            return Err(RegistryError::DuplicateServer(descriptor.server_id));
        }
        tracing::info!(
            server = %descriptor.server_id,
            base_url = %descriptor.base_url,
            "registry: backend registered"
        );
        lock.push(descriptor);
        Ok(())
    }

    /// Snapshot of every backend, in registration order.
    pub async fn all(&self) -> Vec<BackendDescriptor> {
        self.backends.read().await.clone()
    }

    /// The backend owning `namespace`. First-registered wins on collisions.
    pub async fn get(&self, namespace: &str) -> Option<BackendDescriptor> {
        let lock = self.backends.read().await;
        lock.iter()
            .find(|b| b.effective_capabilities().contains_key(namespace))
            .cloned()
    }

    /// Merge every backend's capabilities. A namespace declared twice resolves
    /// to the first-registered backend; the collision is logged, not raised.
    pub async fn capabilities(&self) -> CapabilityMap {
        let lock = self.backends.read().await;
        merge_capabilities(lock.iter())
    }

    pub async fn health(&self) -> GatewayHealth {
        let lock = self.backends.read().await;
        let servers: BTreeMap<String, BackendHealth> = lock
            .iter()
            .map(|b| (b.server_id.clone(), b.health.clone()))
            .collect();
        GatewayHealth {
            status: aggregate_status(lock.iter().map(|b| &b.health.status)),
            servers,
        }
    }

    // ── Health monitor write path ───────────────────────────────────────

    pub(crate) async fn record_health(&self, server_id: &str, health: BackendHealth) {
        let mut lock = self.backends.write().await;
        if let Some(b) = lock.iter_mut().find(|b| b.server_id == server_id) {
            b.health = health;
        }
    }

    pub(crate) async fn record_capabilities(&self, server_id: &str, capabilities: CapabilityMap) {
        let mut lock = self.backends.write().await;
        if let Some(b) = lock.iter_mut().find(|b| b.server_id == server_id) {
            b.capabilities = capabilities;
        }
    }
}

pub fn merge_capabilities<'a>(
    backends: impl IntoIterator<Item = &'a BackendDescriptor>,
) -> CapabilityMap {
    let mut merged = CapabilityMap::new();
    let mut owners: BTreeMap<String, String> = BTreeMap::new();

    for backend in backends {
        for (namespace, capability) in backend.effective_capabilities() {
            if let Some(owner) = owners.get(&namespace) {
                tracing::warn!(
                    namespace = %namespace,
                    owner = %owner,
                    ignored = %backend.server_id,
                    "registry: namespace declared by more than one backend, keeping first"
                );
                continue;
            }
            owners.insert(namespace.clone(), backend.server_id.clone());
            merged.insert(namespace, capability);
        }
    }
    merged
}
