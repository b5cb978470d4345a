//! Webhook audit log and delivery claims.
//!
//! Rows are append-only. A fingerprint may appear more than once: a processed
//! row suppresses identical bodies only for the dedup window, after which the
//! same body is a new occurrence and gets its own row. The partial UNIQUE
//! index on unfinished rows is what makes concurrent deliveries of the same
//! event collapse to one processing attempt. Both the conditional INSERT and
//! the reclaiming UPDATE are single statements, so only one delivery wins.

use crate::storage::error::Result;
use crate::storage::models::{
    ClaimOutcome, DeliveryWindows, NewWebhookLog, WebhookLogEntry, WebhookLogStats,
};
use crate::storage::{now_millis, Database};

const LOG_COLUMNS: &str = r#"
    id, fingerprint, webhook_type, webhook_code, provider_item_id, payload,
    processed, error, attempts, received_at, claimed_at, processed_at
"#;

fn millis_before(now: i64, window: std::time::Duration) -> i64 {
    now.saturating_sub(i64::try_from(window.as_millis()).unwrap_or(i64::MAX))
}

impl Database {
    /// Durably log a delivery and decide whether this caller should process it.
    pub async fn claim_webhook(
        &self,
        entry: &NewWebhookLog<'_>,
        windows: DeliveryWindows,
    ) -> Result<ClaimOutcome> {
        let now = now_millis();
        let dedup_since = millis_before(now, windows.dedup_window);

        let inserted = sqlx::query(
            r#"INSERT OR IGNORE INTO webhook_log (
                   fingerprint, webhook_type, webhook_code, provider_item_id, payload,
                   received_at, claimed_at
               )
               SELECT ?, ?, ?, ?, ?, ?, ?
               WHERE NOT EXISTS (
                   SELECT 1 FROM webhook_log
                   WHERE fingerprint = ? AND (processed = 0 OR processed_at > ?)
               )"#,
        )
        .bind(entry.fingerprint)
        .bind(entry.webhook_type)
        .bind(entry.webhook_code)
        .bind(entry.provider_item_id)
        .bind(entry.payload)
        .bind(now)
        .bind(now)
        .bind(entry.fingerprint)
        .bind(dedup_since)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(ClaimOutcome::Fresh(inserted.last_insert_rowid()));
        }

        let stale_before = millis_before(now, windows.reclaim_after);
        let reclaimed: Option<i64> = sqlx::query_scalar(
            r#"UPDATE webhook_log
               SET claimed_at = ?, attempts = attempts + 1
               WHERE fingerprint = ? AND processed = 0 AND claimed_at <= ?
               RETURNING id"#,
        )
        .bind(now)
        .bind(entry.fingerprint)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match reclaimed {
            Some(id) => ClaimOutcome::Reclaimed(id),
            None => ClaimOutcome::Duplicate,
        })
    }

    /// Close out a claimed delivery, recording the error code if it failed.
    pub async fn mark_webhook_processed(&self, id: i64, error: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_log SET processed = 1, error = ?, processed_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent occurrence of a fingerprint.
    pub async fn get_webhook_log(&self, fingerprint: &str) -> Result<Option<WebhookLogEntry>> {
        let entry = sqlx::query_as::<_, WebhookLogEntry>(&format!(
            "SELECT {LOG_COLUMNS} FROM webhook_log WHERE fingerprint = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Every occurrence of a fingerprint, oldest first.
    pub async fn webhook_log_occurrences(&self, fingerprint: &str) -> Result<Vec<WebhookLogEntry>> {
        let entries = sqlx::query_as::<_, WebhookLogEntry>(&format!(
            "SELECT {LOG_COLUMNS} FROM webhook_log WHERE fingerprint = ? ORDER BY id ASC"
        ))
        .bind(fingerprint)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn webhook_log_stats(&self) -> Result<WebhookLogStats> {
        let (total, unprocessed, failed): (i64, i64, i64) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COALESCE(SUM(CASE WHEN processed = 0 THEN 1 ELSE 0 END), 0),
                      COALESCE(SUM(CASE WHEN error IS NOT NULL THEN 1 ELSE 0 END), 0)
               FROM webhook_log"#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(WebhookLogStats {
            total,
            unprocessed,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const WINDOWS: DeliveryWindows = DeliveryWindows {
        reclaim_after: Duration::from_secs(60),
        dedup_window: Duration::from_secs(300),
    };

    fn entry(fingerprint: &str) -> NewWebhookLog<'_> {
        NewWebhookLog {
            fingerprint,
            webhook_type: "ITEM",
            webhook_code: "ERROR",
            provider_item_id: Some("it-1"),
            payload: "{}",
        }
    }

    #[tokio::test]
    async fn test_second_claim_is_duplicate() {
        let db = Database::in_memory().await.unwrap();

        let first = db.claim_webhook(&entry("fp-1"), WINDOWS).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Fresh(_)));
        // In flight, lease not expired
        assert_eq!(
            db.claim_webhook(&entry("fp-1"), WINDOWS).await.unwrap(),
            ClaimOutcome::Duplicate
        );

        if let ClaimOutcome::Fresh(id) = first {
            db.mark_webhook_processed(id, None).await.unwrap();
        }
        // Processed rows are never reclaimed, even with a zero lease
        let zero_lease = DeliveryWindows {
            reclaim_after: Duration::ZERO,
            ..WINDOWS
        };
        assert_eq!(
            db.claim_webhook(&entry("fp-1"), zero_lease).await.unwrap(),
            ClaimOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn test_unfinished_claim_reclaimed_after_lease() {
        let db = Database::in_memory().await.unwrap();
        let first = db.claim_webhook(&entry("fp-2"), WINDOWS).await.unwrap();
        let ClaimOutcome::Fresh(id) = first else {
            panic!("expected fresh claim");
        };

        let zero_lease = DeliveryWindows {
            reclaim_after: Duration::ZERO,
            ..WINDOWS
        };
        let again = db.claim_webhook(&entry("fp-2"), zero_lease).await.unwrap();
        assert_eq!(again, ClaimOutcome::Reclaimed(id));

        let row = db.get_webhook_log("fp-2").await.unwrap().unwrap();
        assert_eq!(row.attempts, 2);
        assert!(!row.processed);
    }

    #[tokio::test]
    async fn test_processed_row_outside_window_is_new_occurrence() {
        let db = Database::in_memory().await.unwrap();
        let no_window = DeliveryWindows {
            dedup_window: Duration::ZERO,
            ..WINDOWS
        };

        let ClaimOutcome::Fresh(first) = db.claim_webhook(&entry("fp-3"), no_window).await.unwrap()
        else {
            panic!("expected fresh claim");
        };
        // Unfinished rows still block regardless of the dedup window
        assert_eq!(
            db.claim_webhook(&entry("fp-3"), no_window).await.unwrap(),
            ClaimOutcome::Duplicate
        );
        db.mark_webhook_processed(first, Some("NOT_FOUND")).await.unwrap();

        let ClaimOutcome::Fresh(second) =
            db.claim_webhook(&entry("fp-3"), no_window).await.unwrap()
        else {
            panic!("expected a new occurrence");
        };
        assert_ne!(first, second);

        let rows = db.webhook_log_occurrences("fp-3").await.unwrap();
        assert_eq!(rows.len(), 2);
        // The earlier row keeps its outcome
        assert!(rows[0].processed);
        assert_eq!(rows[0].error.as_deref(), Some("NOT_FOUND"));
        assert!(!rows[1].processed);
        assert_eq!(db.get_webhook_log("fp-3").await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn test_stats() {
        let db = Database::in_memory().await.unwrap();
        let ClaimOutcome::Fresh(a) = db.claim_webhook(&entry("a"), WINDOWS).await.unwrap() else {
            panic!("expected fresh claim");
        };
        db.claim_webhook(&entry("b"), WINDOWS).await.unwrap();
        db.mark_webhook_processed(a, Some("NOT_FOUND")).await.unwrap();

        let stats = db.webhook_log_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.unprocessed, 1);
        assert_eq!(stats.failed, 1);
    }
}
