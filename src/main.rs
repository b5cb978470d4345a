//! Link reconciler service.
//!
//! ```text
//!     Provider webhook ──▶ public listener ──▶ WebhookIntake (fingerprint, claim)
//!                                                   │
//!                                                   ▼
//!                                    ┌──── dispatch by type/code ────┐
//!                                    ▼               ▼               ▼
//!                          ItemStatusReconciler  LinkSession   TransactionSync
//!                                                 Completer        Trigger
//!                                                   │
//!                                  ProviderGateway ◀┴▶ SecretCipher ──▶ SQLite
//!
//!     Operator (linkctl) ──▶ admin listener ──▶ key rotation, link tokens, sync
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Parser;
use tokio::net::TcpListener;

use link_reconciler::admin::setup_admin_router;
use link_reconciler::config::{load_or_default, watcher::ConfigWatcher};
use link_reconciler::http::{build_router, AppState, HttpServer};
use link_reconciler::lifecycle::{signals, startup, Shutdown, StartupError};
use link_reconciler::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "link-reconciler", version, about = "Webhook ingestion and account-link reconciliation")]
struct Args {
    /// TOML configuration file; defaults plus environment overrides when omitted.
    #[arg(short, long, env = "LINK_RECONCILER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(args.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "link-reconciler starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        webhook_path = %config.webhooks.path,
        database = %config.database.url,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let services = Arc::new(startup::initialize(&config).await?);
    let live = Arc::new(ArcSwap::from_pointee(config.clone()));
    let state = AppState::new(live.clone(), services.clone());

    // Kept alive for the life of the process
    let _watcher = match &args.config {
        Some(path) => match ConfigWatcher::new(path, live.clone()).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                None
            }
        },
        None => None,
    };

    let shutdown = Shutdown::new();
    let mut servers = tokio::task::JoinSet::new();

    let listener = bind(&config.listener.bind_address).await?;
    let public = HttpServer::new("public", build_router(state.clone()));
    servers.spawn(public.run(listener, shutdown.subscribe()));

    if config.admin.enabled {
        let listener = bind(&config.admin.bind_address).await?;
        let admin = HttpServer::new("admin", setup_admin_router(state));
        servers.spawn(admin.run(listener, shutdown.subscribe()));
    }

    tokio::select! {
        _ = signals::wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received, draining in-flight requests");
        }
        Some(result) = servers.join_next() => {
            tracing::error!(?result, "Server exited unexpectedly");
        }
    }
    shutdown.trigger();

    while let Some(result) = servers.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Server error during shutdown"),
            Err(e) => tracing::error!(error = %e, "Server task panicked"),
        }
    }

    services.db.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}
