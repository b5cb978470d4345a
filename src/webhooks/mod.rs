//! Webhook ingestion.
//!
//! # Data Flow
//! ```text
//! POST body
//!     → event.rs (envelope: must be a JSON object)
//!     → fingerprint.rs (SHA-256 of canonical JSON)
//!     → intake.rs (durable log row, claim or duplicate)
//!     → event.rs (classification into a typed event)
//!     → processor.rs (dispatch to reconcile/*, close out the log row)
//! ```
//!
//! # Design Decisions
//! - The log row is written before any side effect
//! - Once logged, the delivery is acknowledged even when processing fails
//! - Only transient storage failures ask the provider to redeliver

pub mod event;
pub mod fingerprint;
pub mod intake;
pub mod processor;

pub use event::{
    ErrorInfo, ItemEvent, ItemEventKind, LinkSessionEvent, SyncUpdatesEvent, WebhookEnvelope,
    WebhookEvent,
};
pub use fingerprint::fingerprint;
pub use intake::{Intake, WebhookIntake};
pub use processor::{WebhookOutcome, WebhookProcessor, WebhookRejection, WebhookStatus};
