//! Non-fatal side calls.
//!
//! Old-item revocation, transaction archiving on revoke and the initial sync
//! kick may fail without failing the operation that triggered them. Running
//! them through `fire_and_log` makes that visible at the call site: the caller
//! receives a `BestEffort` it may inspect or drop.

use std::fmt::Display;
use std::future::Future;

use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum BestEffort {
    Done,
    Failed(String),
}

impl BestEffort {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Await `fut`, logging a failure instead of returning it.
pub async fn fire_and_log<F, T, E>(operation: &'static str, fut: F) -> BestEffort
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(_) => {
            debug!(operation, "Best-effort call succeeded");
            BestEffort::Done
        }
        Err(e) => {
            warn!(operation, error = %e, "Best-effort call failed, continuing");
            BestEffort::Failed(e.to_string())
        }
    }
}
