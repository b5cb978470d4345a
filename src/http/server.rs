//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for webhooks and health
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve until the shutdown coordinator fires

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::http::health::health;
use crate::http::webhook::receive_webhook;
use crate::lifecycle::shutdown;
use crate::lifecycle::Services;
use crate::observability::tracing::request_span;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live configuration; swapped by the config watcher.
    pub config: Arc<ArcSwap<ServiceConfig>>,
    pub services: Arc<Services>,
}

impl AppState {
    pub fn new(config: Arc<ArcSwap<ServiceConfig>>, services: Arc<Services>) -> Self {
        Self { config, services }
    }
}

/// Build the public router with all middleware layers.
///
/// Route path, body limit and timeout are read once here; changing them
/// requires a restart.
#[allow(deprecated)]
pub fn build_router(state: AppState) -> Router {
    let config = state.config.load_full();

    Router::new()
        .route(&config.webhooks.path, post(receive_webhook))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
        // Outside the timeout: its inner response body must be `Default`
        .layer(RequestBodyLimitLayer::new(config.webhooks.max_body_bytes))
}

/// A router bound to a listener, served until shutdown.
pub struct HttpServer {
    name: &'static str,
    router: Router,
}

impl HttpServer {
    pub fn new(name: &'static str, router: Router) -> Self {
        Self { name, router }
    }

    pub async fn run(
        self,
        listener: TcpListener,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(server = self.name, address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown_rx))
            .await?;

        tracing::info!(server = self.name, "HTTP server stopped");
        Ok(())
    }
}
