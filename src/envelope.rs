//! Request / response envelopes for the `/mcp` endpoint.
//!
//! Every request carries a dot-namespaced `method`, a `params` object and an
//! `id` that is echoed verbatim in the response, including on error. Backends
//! speak the same envelope, so a gateway can be fronted by another gateway.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ── Error codes ─────────────────────────────────────────────────────────────

pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Transport or internal failure; the message carries the underlying cause.
pub const SERVER_ERROR: i64 = -32000;
/// Unknown workflow session.
pub const SESSION_NOT_FOUND: i64 = -32001;

// ── Request id ──────────────────────────────────────────────────────────────

/// A request id: either a JSON number or a string. `0` is a legitimate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    String(String),
}

impl RequestId {
    /// Extract an id from a raw JSON value. Only strings and numbers qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(RequestId::Number(n.clone())),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

// ── Request envelope ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub id: RequestId,
}

impl RequestEnvelope {
    pub fn new(method: impl Into<String>, params: Map<String, Value>, id: RequestId) -> Self {
        Self {
            protocol_version: None,
            method: method.into(),
            params,
            id,
        }
    }

    /// Segment of `method` before the first `.`.
    pub fn namespace(&self) -> &str {
        split_method(&self.method).0
    }

    /// Everything after the first `.` (empty when the method has no dot).
    pub fn action(&self) -> &str {
        split_method(&self.method).1
    }
}

pub fn split_method(method: &str) -> (&str, &str) {
    method.split_once('.').unwrap_or((method, ""))
}

/// Why a raw request was rejected before routing.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidRequest {
    /// The original id, when one could be extracted.
    pub id: Option<RequestId>,
    pub reason: String,
}

impl InvalidRequest {
    fn new(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }

    pub fn into_response(self) -> ResponseEnvelope {
        ResponseEnvelope::failure(
            self.id,
            RpcError::new(INVALID_REQUEST, format!("Invalid request: {}", self.reason)),
        )
    }
}

/// Validate a raw JSON value as a request envelope. No side effects.
pub fn validate(raw: &Value) -> Result<RequestEnvelope, InvalidRequest> {
    let Some(obj) = raw.as_object() else {
        return Err(InvalidRequest::new(None, "envelope must be a JSON object"));
    };

    let id = obj.get("id").and_then(RequestId::from_value);

    let method = match obj.get("method") {
        Some(Value::String(m)) if !m.trim().is_empty() => m.clone(),
        Some(Value::String(_)) => return Err(InvalidRequest::new(id, "'method' must not be empty")),
        Some(_) => return Err(InvalidRequest::new(id, "'method' must be a string")),
        None => return Err(InvalidRequest::new(id, "missing 'method'")),
    };

    let Some(id) = id else {
        let reason = match obj.get("id") {
            None | Some(Value::Null) => "missing 'id'",
            Some(_) => "'id' must be a string or a number",
        };
        return Err(InvalidRequest::new(None, reason));
    };

    let params = match obj.get("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(p)) => p.clone(),
        Some(_) => return Err(InvalidRequest::new(Some(id), "'params' must be an object")),
    };

    let protocol_version = obj
        .get("protocolVersion")
        .and_then(|v| v.as_str())
        .map(String::from);

    Ok(RequestEnvelope {
        protocol_version,
        method,
        params,
        id,
    })
}

// ── Response envelope ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

/// Exactly one of `result` / `error`, plus the original id (`null` if unknown).
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: Option<RequestId>,
    pub outcome: Outcome,
}

impl ResponseEnvelope {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn failure(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match &self.outcome {
            Outcome::Error(e) => Some(e),
            Outcome::Result(_) => None,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }

    /// Parse a response received from a backend. `error` wins over `result`
    /// when a misbehaving backend sends both; `{"result": null}` is a valid result.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut obj) = value else {
            return Err("response must be a JSON object".to_string());
        };
        let id = obj.get("id").and_then(RequestId::from_value);

        if let Some(error) = obj.remove("error").filter(|e| !e.is_null()) {
            let error: RpcError = serde_json::from_value(error)
                .map_err(|e| format!("malformed 'error' object: {e}"))?;
            return Ok(Self::failure(id, error));
        }
        match obj.remove("result") {
            Some(result) => Ok(Self::success(id, result)),
            None => Err("response carries neither 'result' nor 'error'".to_string()),
        }
    }
}

impl Serialize for ResponseEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match &self.outcome {
            Outcome::Result(v) => map.serialize_entry("result", v)?,
            Outcome::Error(e) => map.serialize_entry("error", e)?,
        }
        map.serialize_entry("id", &self.id)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResponseEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ResponseEnvelope::from_value(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_envelope_defaults_params() {
        let env = validate(&json!({ "method": "github.issues.list", "id": 7 })).unwrap();
        assert_eq!(env.method, "github.issues.list");
        assert_eq!(env.id, RequestId::from(7));
        assert!(env.params.is_empty());
        assert_eq!(env.namespace(), "github");
        assert_eq!(env.action(), "issues.list");
    }

    #[test]
    fn zero_is_a_legitimate_id() {
        let env = validate(&json!({ "method": "document.generate", "id": 0 })).unwrap();
        assert_eq!(env.id, RequestId::from(0));
    }

    #[test]
    fn missing_method_echoes_id() {
        let err = validate(&json!({ "id": "abc", "params": {} })).unwrap_err();
        assert_eq!(err.id, Some(RequestId::from("abc")));

        let resp = serde_json::to_value(err.into_response()).unwrap();
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
        assert_eq!(resp["id"], "abc");
    }

    #[test]
    fn empty_method_is_rejected() {
        let err = validate(&json!({ "method": "  ", "id": 1 })).unwrap_err();
        assert_eq!(err.id, Some(RequestId::from(1)));
    }

    #[test]
    fn missing_id_yields_null_id() {
        let err = validate(&json!({ "method": "github.issues.list" })).unwrap_err();
        assert_eq!(err.id, None);

        let resp = serde_json::to_value(err.into_response()).unwrap();
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
        assert!(resp["id"].is_null());
    }

    #[test]
    fn non_scalar_id_is_not_extractable() {
        let err = validate(&json!({ "method": "x.y", "id": [1] })).unwrap_err();
        assert_eq!(err.id, None);
        assert!(err.reason.contains("string or a number"));
    }

    #[test]
    fn non_object_params_rejected_with_id() {
        let err = validate(&json!({ "method": "x.y", "id": 3, "params": [1, 2] })).unwrap_err();
        assert_eq!(err.id, Some(RequestId::from(3)));
    }

    #[test]
    fn non_object_envelope_rejected() {
        assert!(validate(&json!("github.issues.list")).is_err());
    }

    #[test]
    fn response_serializes_exactly_one_branch() {
        let ok = serde_json::to_value(ResponseEnvelope::success(Some(1.into()), json!([]))).unwrap();
        assert_eq!(ok, json!({ "result": [], "id": 1 }));

        let err = serde_json::to_value(ResponseEnvelope::failure(
            None,
            RpcError::new(METHOD_NOT_FOUND, "nope"),
        ))
        .unwrap();
        assert_eq!(err, json!({ "error": { "code": -32601, "message": "nope" }, "id": null }));
    }

    #[test]
    fn backend_response_with_null_result_parses() {
        let resp = ResponseEnvelope::from_value(json!({ "result": null, "id": "r1" })).unwrap();
        assert_eq!(resp.result(), Some(&Value::Null));
        assert_eq!(resp.id, Some(RequestId::from("r1")));
    }

    #[test]
    fn backend_response_without_outcome_is_rejected() {
        assert!(ResponseEnvelope::from_value(json!({ "id": 1 })).is_err());
    }
}
