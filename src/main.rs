use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use docgen_gateway::assistant::AssistantProvider;
use docgen_gateway::config::GatewayConfig;
use docgen_gateway::state::AppState;
use docgen_gateway::transport::HttpTransport;

async fn build_app(config: GatewayConfig) -> anyhow::Result<(axum::Router, AppState)> {
    let transport = HttpTransport::new(config.call_timeout).context("building HTTP client")?;
    let state = AppState::new(config, Arc::new(transport))
        .await
        .context("registering backends")?;

    // Local tooling (assistants, dashboards) calls the gateway cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(86_400));

    let nosniff: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    let app = docgen_gateway::create_router(state.clone())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024))
        .layer(cors)
        .layer(nosniff)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
        )
        .layer(CompressionLayer::new());

    Ok((app, state))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    dotenvy::dotenv().ok();
    let config = GatewayConfig::from_env()?;
    let port = config.port;
    let startup_wait = config.startup_wait;
    let configure_assistant = config.configure_assistant;

    let (app, state) = build_app(config).await?;

    // ── Health monitor: first poll now, then every interval ──
    let cancel = CancellationToken::new();
    let monitor = state.monitor.clone().spawn(cancel.clone());

    if startup_wait.is_zero() {
        state.mark_ready();
    } else {
        let ready_state = state.clone();
        tokio::spawn(async move {
            if ready_state.monitor.wait_until_healthy(startup_wait).await {
                tracing::info!("startup: all backends healthy");
            }
            ready_state.mark_ready();
        });
    }

    if configure_assistant {
        let gateway_url = format!("http://localhost:{port}");
        match AssistantProvider::detect() {
            Some(provider) => {
                if let Err(e) = provider.configure_mcp(&gateway_url) {
                    tracing::warn!("startup: configuring {} failed: {}", provider.name(), e);
                }
            }
            None => tracing::warn!("startup: MCP_CONFIGURE_ASSISTANT set but no assistant detected"),
        }
    }

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("docgen-gateway listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    monitor.await.ok();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
