//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on elapse
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// A bounded call ran past its deadline.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("timed out after {}ms", .0.as_millis())]
pub struct Elapsed(pub Duration);

/// Run `fut` with a deadline of `limit`.
pub async fn bounded<F>(limit: Duration, fut: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Elapsed(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let value = bounded(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_elapses() {
        let limit = Duration::from_millis(50);
        let result = bounded(limit, tokio::time::sleep(Duration::from_secs(10))).await;
        assert_eq!(result, Err(Elapsed(limit)));
        assert_eq!(Elapsed(limit).to_string(), "timed out after 50ms");
    }
}
