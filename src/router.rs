//! Method router: namespace → owning backend.
//!
//! The router is protocol-transparent. `params` are forwarded unchanged and
//! `result` is never inspected; only delivery failures are translated.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::envelope::{Outcome, RequestEnvelope, RequestId, ResponseEnvelope};
use crate::error::GatewayError;
use crate::registry::ServerRegistry;
use crate::retry::RetryPolicy;
use crate::transport::McpTransport;
use crate::workflow::WORKFLOW_NAMESPACE;

#[derive(Clone)]
pub struct McpRouter {
    registry: ServerRegistry,
    transport: Arc<dyn McpTransport>,
    retry: RetryPolicy,
}

impl McpRouter {
    pub fn new(registry: ServerRegistry, transport: Arc<dyn McpTransport>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            transport,
            retry,
        }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Route one envelope and always answer with an envelope carrying the
    /// caller's id, whatever the outcome.
    pub async fn dispatch(&self, request: RequestEnvelope) -> ResponseEnvelope {
        let id = Some(request.id.clone());
        match self.forward(&request).await {
            Ok(response) => ResponseEnvelope {
                id,
                outcome: response.outcome,
            },
            Err(e) => ResponseEnvelope::failure(id, e.into_rpc_error()),
        }
    }

    /// Forward to the owning backend. A backend protocol error comes back as
    /// `Ok` with an `error` outcome; `Err` means the gateway could not route
    /// or deliver the call.
    pub async fn forward(&self, request: &RequestEnvelope) -> Result<ResponseEnvelope, GatewayError> {
        let namespace = request.namespace();
        if namespace == WORKFLOW_NAMESPACE {
            return Err(GatewayError::Routing(format!(
                "'{}' is served by the gateway itself",
                request.method
            )));
        }

        let backend = self
            .registry
            .get(namespace)
            .await
            .ok_or_else(|| GatewayError::Routing(format!("no backend serves namespace '{namespace}'")))?;

        let capabilities = backend.effective_capabilities();
        if let Some(capability) = capabilities.get(namespace)
            && !capability.allows(request.action())
        {
            return Err(GatewayError::Routing(format!(
                "'{}' is not advertised by '{}'",
                request.method, backend.server_id
            )));
        }

        tracing::info!(
            method = %request.method,
            id = %request.id,
            server = %backend.server_id,
            "forwarding call"
        );

        let transport = self.transport.as_ref();
        let target = &backend;
        let response = self
            .retry
            .run(&request.method, move || transport.call(target, request))
            .await?;
        Ok(response)
    }

    /// Issue a call on the gateway's own behalf (workflow phases) and unwrap
    /// the result. A backend error becomes `GatewayError::Backend`.
    pub async fn call(&self, method: &str, params: Map<String, Value>) -> Result<Value, GatewayError> {
        let request = RequestEnvelope::new(method, params, RequestId::String(Uuid::new_v4().to_string()));
        let response = self.forward(&request).await?;
        match response.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(e) => Err(GatewayError::Backend(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::envelope::{RpcError, METHOD_NOT_FOUND, SERVER_ERROR};
    use crate::registry::{BackendDescriptor, CapabilityMap, NamespaceCapability};
    use crate::transport::testing::{unreachable, Reply, ScriptedTransport};

    async fn router_with(transport: ScriptedTransport) -> (McpRouter, Arc<ScriptedTransport>) {
        let registry = ServerRegistry::new();
        let mut caps = CapabilityMap::new();
        caps.insert(
            "github".into(),
            NamespaceCapability::new("1.0", ["issues.list", "issues.create"]),
        );
        registry
            .register(BackendDescriptor::new("gh", "http://gh").with_capabilities(caps))
            .await
            .unwrap();
        registry
            .register(BackendDescriptor::new("document", "http://docs"))
            .await
            .unwrap();

        let transport = Arc::new(transport);
        let router = McpRouter::new(
            registry,
            transport.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        (router, transport)
    }

    fn envelope(method: &str, id: RequestId) -> RequestEnvelope {
        let mut params = Map::new();
        params.insert("owner".into(), json!("acme"));
        RequestEnvelope::new(method, params, id)
    }

    #[tokio::test]
    async fn forwards_params_unchanged_and_keeps_id() {
        let (router, transport) = router_with(
            ScriptedTransport::new().reply("github.issues.list", Reply::Result(json!([{"number": 1}]))),
        )
        .await;

        let resp = router.dispatch(envelope("github.issues.list", 42.into())).await;
        assert_eq!(resp.id, Some(RequestId::from(42)));
        assert_eq!(resp.result(), Some(&json!([{"number": 1}])));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "gh");
        assert_eq!(sent[0].1.params["owner"], "acme");
    }

    #[tokio::test]
    async fn unknown_namespace_is_method_not_found() {
        let (router, transport) = router_with(ScriptedTransport::new()).await;
        let resp = router.dispatch(envelope("paper.extract", "p1".into())).await;
        assert_eq!(resp.error().unwrap().code, METHOD_NOT_FOUND);
        assert_eq!(resp.id, Some(RequestId::from("p1")));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn unadvertised_action_is_method_not_found() {
        let (router, transport) = router_with(ScriptedTransport::new()).await;
        let resp = router.dispatch(envelope("github.repos.delete", 1.into())).await;
        assert_eq!(resp.error().unwrap().code, METHOD_NOT_FOUND);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn undiscovered_backend_accepts_any_action() {
        let (router, transport) = router_with(ScriptedTransport::new()).await;
        let resp = router.dispatch(envelope("document.generate", 1.into())).await;
        assert!(resp.result().is_some());
        assert_eq!(transport.requests()[0].0, "document");
    }

    #[tokio::test]
    async fn workflow_namespace_is_never_forwarded() {
        let (router, transport) = router_with(ScriptedTransport::new()).await;
        let resp = router.dispatch(envelope("workflow.create", 1.into())).await;
        assert_eq!(resp.error().unwrap().code, METHOD_NOT_FOUND);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_server_error_with_cause() {
        let (router, transport) = router_with(
            ScriptedTransport::new().reply("github.issues.create", unreachable("gh")),
        )
        .await;

        let resp = router.dispatch(envelope("github.issues.create", "c1".into())).await;
        let err = resp.error().unwrap();
        assert_eq!(err.code, SERVER_ERROR);
        assert!(err.message.contains("connection refused"));
        assert_eq!(resp.id, Some(RequestId::from("c1")));
        assert_eq!(transport.calls_to("github.issues.create"), 1);
    }

    #[tokio::test]
    async fn idempotent_call_is_retried_through_router() {
        let (router, transport) = router_with(
            ScriptedTransport::new()
                .queue("github.issues.list", unreachable("gh"))
                .queue("github.issues.list", unreachable("gh"))
                .queue("github.issues.list", Reply::Result(json!([]))),
        )
        .await;

        let resp = router.dispatch(envelope("github.issues.list", 5.into())).await;
        assert_eq!(resp.result(), Some(&json!([])));
        assert_eq!(transport.calls_to("github.issues.list"), 3);
    }

    #[tokio::test]
    async fn backend_error_passes_through_and_is_not_retried() {
        let rejected = RpcError::new(-32010, "label does not exist").with_data(json!({"label": "x"}));
        let (router, transport) = router_with(
            ScriptedTransport::new().reply("github.issues.list", Reply::Error(rejected.clone())),
        )
        .await;

        let resp = router.dispatch(envelope("github.issues.list", 9.into())).await;
        assert_eq!(resp.error(), Some(&rejected));
        assert_eq!(transport.calls_to("github.issues.list"), 1);

        let err = router.call("github.issues.list", Map::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Backend(e) if e == rejected));
    }
}
