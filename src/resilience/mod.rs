//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call (provider API):
//!     → timeouts.rs (enforce a per-call deadline)
//!     → On elapse: surfaced as a retryable, transient failure
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No in-process retries; upstream webhook redelivery drives retry

pub mod timeouts;

pub use timeouts::{bounded, Elapsed};
