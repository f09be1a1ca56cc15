//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, outer timeout)
//! - Bind to the listener, plain or TLS
//! - Dispatch every request into the pipeline

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderName,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::tls::load_tls_config;
use crate::pipeline::Pipeline;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// HTTP server for the hostname-translating proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    pub fn new(config: ProxyConfig, pipeline: Arc<Pipeline>) -> Self {
        let state = AppState { pipeline };
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        // Outer bound sits above the upstream timeout so the 504 path
        // inside the pipeline fires first.
        let outer_timeout = Duration::from_secs(config.upstream.timeout_secs + 5);

        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(outer_timeout))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until the shutdown coordinator fires.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;

        if let Some(tls) = &self.config.listener.tls {
            let tls_config = load_tls_config(
                std::path::Path::new(&tls.cert_path),
                std::path::Path::new(&tls.key_path),
            )
            .await?;
            tracing::info!(address = %addr, "HTTPS server starting");

            let std_listener = listener.into_std()?;
            let handle = axum_server::Handle::new();
            let stop_handle = handle.clone();
            let mut rx = shutdown.subscribe();
            tokio::spawn(async move {
                let _ = rx.recv().await;
                stop_handle.graceful_shutdown(Some(Duration::from_secs(10)));
            });

            axum_server::from_tcp_rustls(std_listener, tls_config)
                .handle(handle)
                .serve(
                    self.router
                        .into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await?;
        } else {
            tracing::info!(address = %addr, "HTTP server starting");

            let app = self
                .router
                .into_make_service_with_connect_info::<SocketAddr>();
            let mut rx = shutdown.subscribe();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.recv().await;
                })
                .await?;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: hand the request to the pipeline.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
) -> Response {
    state.pipeline.handle(peer, request).await
}
