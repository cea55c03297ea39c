// `workflow.*` methods served by the gateway itself.

use serde_json::{Map, Value};

use crate::envelope::RequestEnvelope;
use crate::error::GatewayError;
use crate::registry::NamespaceCapability;

use super::{PhaseName, WorkflowEngine};

pub const WORKFLOW_NAMESPACE: &str = "workflow";

const ACTIONS: &[&str] = &[
    "create",
    "get",
    "list",
    "execute",
    "testing.execute",
    "issues.execute",
    "todos.execute",
];

/// Capability entry advertised for the reserved namespace.
pub fn workflow_capability() -> NamespaceCapability {
    NamespaceCapability::new(env!("CARGO_PKG_VERSION"), ACTIONS.iter().copied())
}

impl WorkflowEngine {
    /// Serve one `workflow.*` request. Returns the `result` payload.
    pub async fn handle(&self, request: &RequestEnvelope) -> Result<Value, GatewayError> {
        let params = &request.params;
        match request.action() {
            "create" => {
                let session = self
                    .create(
                        required(params, "owner")?,
                        required(params, "repo")?,
                        optional(params, "sessionId")?,
                    )
                    .await?;
                to_value(&session)
            }
            "get" => {
                let session = self.get(required(params, "sessionId")?).await?;
                to_value(&session)
            }
            "list" => to_value(&self.list().await),
            "execute" => {
                let session = self
                    .execute(
                        required(params, "owner")?,
                        required(params, "repo")?,
                        optional(params, "sessionId")?,
                        params,
                    )
                    .await?;
                to_value(&session)
            }
            action => {
                let phase = action
                    .strip_suffix(".execute")
                    .and_then(|p| p.parse::<PhaseName>().ok())
                    .ok_or_else(|| GatewayError::Routing(format!("unknown workflow method '{}'", request.method)))?;
                let session_id = required(params, "sessionId")?;
                self.execute_phase(session_id, phase, params).await?;
                to_value(&self.get(session_id).await?)
            }
        }
    }
}

fn required<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str, GatewayError> {
    match params.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => Err(GatewayError::InvalidParams(format!("'{key}' must not be empty"))),
        Some(_) => Err(GatewayError::InvalidParams(format!("'{key}' must be a string"))),
        None => Err(GatewayError::InvalidParams(format!("missing '{key}'"))),
    }
}

fn optional(params: &Map<String, Value>, key: &str) -> Result<Option<String>, GatewayError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => required(params, key).map(|s| Some(s.to_string())),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::Internal(format!("serializing workflow result: {e}")))
}
