//! Outbound calls to backends over HTTP.
//!
//! Every backend exposes the gateway's own surface (`POST /mcp`, `GET /health`,
//! `GET /mcp/capabilities`), so the same transport also reaches another gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::TransportError;
use crate::registry::{BackendDescriptor, CapabilityMap};

#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Forward one request envelope. A backend protocol error is an `Ok`
    /// response carrying `error`; only delivery failures are `Err`.
    async fn call(
        &self,
        backend: &BackendDescriptor,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope, TransportError>;

    /// Check the backend's health endpoint. Any 2xx is healthy.
    async fn health(&self, backend: &BackendDescriptor) -> Result<Value, TransportError>;

    /// Fetch the backend's advertised capability map.
    async fn capabilities(&self, backend: &BackendDescriptor) -> Result<CapabilityMap, TransportError>;
}

// ── HTTP transport ──────────────────────────────────────────────────────────

pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, timeout })
    }

    async fn send(
        &self,
        backend: &BackendDescriptor,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, TransportError> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(backend, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                server: backend.server_id.clone(),
                status: status.as_u16(),
                body: truncate_str(&body_text, 500),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                self.classify(backend, e)
            } else {
                TransportError::Decode {
                    server: backend.server_id.clone(),
                    reason: format!("response is not valid JSON: {e}"),
                }
            }
        })
    }

    fn classify(&self, backend: &BackendDescriptor, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                server: backend.server_id.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            TransportError::Unreachable {
                server: backend.server_id.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn call(
        &self,
        backend: &BackendDescriptor,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope, TransportError> {
        let url = backend.endpoint("/mcp");
        let body = self.send(backend, self.client.post(&url).json(request)).await?;
        ResponseEnvelope::from_value(body).map_err(|reason| TransportError::Decode {
            server: backend.server_id.clone(),
            reason,
        })
    }

    async fn health(&self, backend: &BackendDescriptor) -> Result<Value, TransportError> {
        let url = backend.endpoint("/health");
        self.send(backend, self.client.get(&url)).await
    }

    async fn capabilities(&self, backend: &BackendDescriptor) -> Result<CapabilityMap, TransportError> {
        let url = backend.endpoint("/mcp/capabilities");
        let body = self.send(backend, self.client.get(&url)).await?;
        serde_json::from_value(body).map_err(|e| TransportError::Decode {
            server: backend.server_id.clone(),
            reason: format!("malformed capability map: {e}"),
        })
    }
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let boundary = s
            .char_indices()
            .take_while(|(i, _)| *i < max_len)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(max_len);
        format!("{}...", &s[..boundary])
    }
}

// ── Scripted transport for unit tests ───────────────────────────────────────
