//! Gateway configuration, read once from the environment at startup.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::monitor::DEFAULT_POLL_INTERVAL;
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::workflow::DEFAULT_MAX_SESSIONS;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BACKENDS: &str = "github=http://localhost:3000,main=http://localhost:3200";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub server_id: String,
    pub base_url: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub port: u16,
    /// In registration order.
    pub backends: Vec<BackendConfig>,
    pub health_interval: Duration,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_sessions: usize,
    pub parallel_tests: bool,
    pub startup_wait: Duration,
    pub health_log: Option<PathBuf>,
    pub configure_assistant: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            backends: Vec::new(),
            health_interval: DEFAULT_POLL_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::default(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            parallel_tests: false,
            startup_wait: Duration::ZERO,
            health_log: None,
            configure_assistant: false,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset and blank values take the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backends = parse_backends(
            get("MCP_BACKENDS").as_deref().unwrap_or(DEFAULT_BACKENDS),
        )?;

        Ok(Self {
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            backends,
            health_interval: Duration::from_secs(parse_or(
                &get,
                "MCP_HEALTH_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL.as_secs(),
            )?)
            .max(Duration::from_secs(1)),
            call_timeout: Duration::from_secs(parse_or(
                &get,
                "MCP_CALL_TIMEOUT_SECS",
                DEFAULT_CALL_TIMEOUT.as_secs(),
            )?),
            retry: RetryPolicy::new(
                parse_or(&get, "MCP_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
                Duration::from_millis(parse_or(
                    &get,
                    "MCP_RETRY_DELAY_MS",
                    DEFAULT_RETRY_DELAY.as_millis() as u64,
                )?),
            ),
            max_sessions: parse_or(&get, "MCP_MAX_SESSIONS", DEFAULT_MAX_SESSIONS)?,
            parallel_tests: parse_flag(&get, "MCP_PARALLEL_TESTS")?,
            startup_wait: Duration::from_secs(parse_or(&get, "MCP_STARTUP_WAIT_SECS", 0)?),
            health_log: get("MCP_HEALTH_LOG").map(PathBuf::from),
            configure_assistant: parse_flag(&get, "MCP_CONFIGURE_ASSISTANT")?,
        })
    }
}

/// `id=url,id=url`. Order is kept; ids must be unique.
pub fn parse_backends(raw: &str) -> Result<Vec<BackendConfig>, ConfigError> {
    let err = |reason: String| ConfigError {
        var: "MCP_BACKENDS",
        reason,
    };

    let mut seen = HashSet::new();
    let mut backends = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, url) = entry
            .split_once('=')
            .ok_or_else(|| err(format!("'{entry}' is not of the form id=url")))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(err(format!("'{entry}' has an empty server id")));
        }
        let base_url = Url::parse(url.trim()).map_err(|e| err(format!("'{id}': {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(err(format!("'{id}': unsupported scheme '{}'", base_url.scheme())));
        }
        if !seen.insert(id.to_string()) {
            return Err(err(format!("duplicate server id '{id}'")));
        }
        backends.push(BackendConfig {
            server_id: id.to_string(),
            base_url,
        });
    }
    Ok(backends)
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError {
            var,
            reason: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_flag<G>(get: &G, var: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(ConfigError {
            var,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}
