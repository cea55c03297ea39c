//! Error taxonomy for the gateway.
//!
//! Malformed envelopes never get this far: [`crate::envelope::validate`]
//! rejects them and the HTTP layer answers directly. `Routing` is resolved at
//! the gateway boundary and never reaches a backend. `Transport` is the only
//! class the retry layer looks at. `Backend` is the backend's own protocol
//! error and is passed through untouched.

use crate::envelope::{
    RpcError, INVALID_PARAMS, METHOD_NOT_FOUND, SERVER_ERROR, SESSION_NOT_FOUND,
};

/// Failure to obtain a well-formed response from a backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("backend '{server}' unreachable: {reason}")]
    Unreachable { server: String, reason: String },

    #[error("backend '{server}' timed out after {timeout_ms}ms")]
    Timeout { server: String, timeout_ms: u64 },

    #[error("backend '{server}' returned HTTP {status}: {body}")]
    Status {
        server: String,
        status: u16,
        body: String,
    },

    #[error("backend '{server}' sent an invalid response: {reason}")]
    Decode { server: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("workflow session '{0}' not found")]
    NotFound(String),

    #[error("workflow session '{0}' already exists")]
    AlreadyExists(String),

    #[error("session capacity exhausted ({0} sessions are running)")]
    CapacityExhausted(usize),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("server '{0}' is already registered")]
    DuplicateServer(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Method not found: {0}")]
    Routing(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("backend error [{}]: {}", .0.code, .0.message)]
    Backend(RpcError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> i64 {
        match self {
            GatewayError::Routing(_) => METHOD_NOT_FOUND,
            GatewayError::InvalidParams(_) => INVALID_PARAMS,
            GatewayError::Transport(_) => SERVER_ERROR,
            GatewayError::Backend(e) => e.code,
            GatewayError::Session(SessionError::NotFound(_)) => SESSION_NOT_FOUND,
            GatewayError::Session(_) => SERVER_ERROR,
            GatewayError::Internal(_) => SERVER_ERROR,
        }
    }

    /// Whether the fault lies with the gateway itself (HTTP 500).
    pub fn is_internal(&self) -> bool {
        matches!(self, GatewayError::Internal(_))
    }

    pub fn into_rpc_error(self) -> RpcError {
        match self {
            GatewayError::Backend(e) => e,
            other => RpcError::new(other.code(), other.to_string()),
        }
    }
}
