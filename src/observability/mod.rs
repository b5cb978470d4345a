//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!     → tracing.rs (per-request spans carrying the request id)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`item_id`, `fingerprint`, `webhook_code`) over formatted strings
//! - Secrets never appear in fields or messages
//! - Metrics go through the `metrics` facade; without an installed recorder they are no-ops

pub mod logging;
pub mod metrics;
pub mod tracing;
