//! Pull-based transaction sync.
//!
//! # Data Flow
//! ```text
//! trigger (initial link kick | admin | sweep)
//!     → decrypt access token
//!     → page /transactions/sync from the stored cursor
//!     → one storage transaction: upsert, archive removed, advance cursor
//! ```

pub mod syncer;

pub use syncer::{SweepReport, SyncReport, SyncSettings, TransactionSyncer};
