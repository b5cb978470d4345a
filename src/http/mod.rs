//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, middleware stack)
//!     → webhook.rs (POST {webhooks.path}) → WebhookProcessor
//!     → health.rs (GET /health) → Database::ping
//!     → error.rs (JSON error bodies)
//! ```

pub mod error;
pub mod health;
pub mod server;
pub mod webhook;

pub use error::{ApiError, ApiResult};
pub use server::{build_router, AppState, HttpServer};
