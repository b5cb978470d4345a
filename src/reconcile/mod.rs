//! Reconciliation services.
//!
//! # Data Flow
//! ```text
//! WebhookEvent
//!     → Item(..)        → item_status.rs (state machine, revocation cascade)
//!     → SyncUpdates(..) → sync_trigger.rs (flag policy)
//!     → LinkSession(..) → link_session.rs
//!                             → resolution.rs (update mode | duplicate | create)
//!                             → best_effort.rs (revoke old item, initial sync)
//! ```
//!
//! # Design Decisions
//! - Services are constructed once and shared; no module globals
//! - Non-fatal side calls return `BestEffort` instead of an error

pub mod best_effort;
pub mod item_status;
pub mod link_session;
pub mod resolution;
pub mod sync_trigger;

pub use best_effort::{fire_and_log, BestEffort};
pub use item_status::{ItemOutcome, ItemStatusReconciler};
pub use link_session::{LinkSessionCompleter, SessionOutcome};
pub use resolution::{resolve_item, ItemResolution};
pub use sync_trigger::TransactionSyncTrigger;
