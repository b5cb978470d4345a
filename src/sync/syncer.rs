//! Cursor pagination against the provider's transaction sync endpoint.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::crypto::SecretCipher;
use crate::error::{ReconcileError, ReconcileResult};
use crate::observability::metrics;
use crate::provider::{ProviderApi, ProviderResult};
use crate::storage::{Database, TransactionChanges, TransactionSyncCounts};

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub page_size: u32,
    pub max_pages: u32,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            page_size: config.page_size,
            max_pages: config.max_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub item_id: i64,
    pub pages: u32,
    /// False when `max_pages` ran out before the provider said `has_more = false`.
    pub complete: bool,
    pub counts: TransactionSyncCounts,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<SweepFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub item_id: i64,
    pub error: String,
}

/// Pages collected from one cursor to the end (or the page cap).
struct Pulled {
    changes: TransactionChanges,
    cursor: String,
    pages: u32,
    complete: bool,
}

pub struct TransactionSyncer {
    db: Database,
    cipher: Arc<SecretCipher>,
    provider: Arc<dyn ProviderApi>,
    settings: SyncSettings,
}

impl TransactionSyncer {
    pub fn new(
        db: Database,
        cipher: Arc<SecretCipher>,
        provider: Arc<dyn ProviderApi>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            db,
            cipher,
            provider,
            settings,
        }
    }

    /// Pull and apply all pending transaction changes for one item.
    pub async fn sync_item(&self, item_id: i64) -> ReconcileResult<SyncReport> {
        let item = self
            .db
            .get_item(item_id)
            .await?
            .ok_or_else(|| ReconcileError::not_found("item", item_id.to_string()))?;
        if item.archived {
            return Err(ReconcileError::validation(format!("item {item_id} is archived")));
        }

        let access_token = self
            .cipher
            .decrypt_to_string(&item.access_token_ciphertext, item.access_token_key_id)
            .await?;
        let start = item.transaction_cursor.as_deref();

        let pulled = match self.pull(&access_token, start).await {
            Err(e) if e.is_mutation_during_pagination() => {
                warn!(item_id, "Transactions changed during pagination, restarting from saved cursor");
                self.pull(&access_token, start).await?
            }
            other => other?,
        };

        let counts = self
            .db
            .apply_transaction_sync(item_id, &pulled.changes, &pulled.cursor)
            .await?;
        if !pulled.complete {
            // More pages remain; leave the item eligible for the next sweep
            self.db.set_sync_flag(item_id, true).await?;
        }

        metrics::record_transactions_synced("upserted", counts.upserted);
        metrics::record_transactions_synced("removed", counts.removed);
        metrics::record_transactions_synced("skipped", counts.skipped);
        info!(
            item_id,
            pages = pulled.pages,
            complete = pulled.complete,
            upserted = counts.upserted,
            removed = counts.removed,
            skipped = counts.skipped,
            "Transaction sync applied"
        );

        Ok(SyncReport {
            item_id,
            pages: pulled.pages,
            complete: pulled.complete,
            counts,
        })
    }

    /// Sync up to `limit` items flagged `has_sync_updates`.
    ///
    /// Failures are collected per item; one item never stops the sweep.
    pub async fn sweep(&self, limit: u32) -> ReconcileResult<SweepReport> {
        let items = self.db.items_pending_sync(limit).await?;
        let mut report = SweepReport {
            attempted: items.len(),
            ..Default::default()
        };

        for item in items {
            match self.sync_item(item.id).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    warn!(item_id = item.id, error = %e, "Sweep sync failed");
                    report.failed.push(SweepFailure {
                        item_id: item.id,
                        error: e.code(),
                    });
                }
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            "Sync sweep finished"
        );
        Ok(report)
    }

    async fn pull(&self, access_token: &str, start: Option<&str>) -> ProviderResult<Pulled> {
        let mut changes = TransactionChanges::default();
        let mut cursor = start.map(str::to_string);
        let mut pages = 0;

        loop {
            let page = self
                .provider
                .sync_transactions(access_token, cursor.as_deref(), self.settings.page_size)
                .await?;
            pages += 1;

            changes.added.extend(page.added);
            changes.modified.extend(page.modified);
            changes.removed.extend(page.removed);
            cursor = Some(page.next_cursor);

            if !page.has_more || pages >= self.settings.max_pages {
                return Ok(Pulled {
                    changes,
                    cursor: cursor.unwrap_or_default(),
                    pages,
                    complete: !page.has_more,
                });
            }
        }
    }
}
