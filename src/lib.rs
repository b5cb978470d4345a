//! Webhook ingestion and account-link reconciliation for an
//! account-aggregation provider.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod storage;

// Domain services
pub mod crypto;
pub mod links;
pub mod provider;
pub mod reconcile;
pub mod sync;
pub mod webhooks;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ServiceConfig;
pub use error::{ConflictKind, ReconcileError, ReconcileResult};
pub use http::{AppState, HttpServer};
pub use lifecycle::{Services, Shutdown};
