//! When an item becomes eligible for a pull-based transaction sync.

use tracing::{debug, info};

use crate::error::{ReconcileError, ReconcileResult};
use crate::storage::Database;
use crate::webhooks::SyncUpdatesEvent;

/// Flag policy for a "sync updates available" event.
///
/// Established items (cursor present) are always flagged. New items are
/// flagged only once their historical backfill is complete, so a partial
/// window is never surfaced.
pub fn should_flag(has_cursor: bool, historical_update_complete: bool) -> bool {
    has_cursor || historical_update_complete
}

pub struct TransactionSyncTrigger {
    db: Database,
}

impl TransactionSyncTrigger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns whether the item was flagged.
    pub async fn on_sync_updates(&self, event: &SyncUpdatesEvent) -> ReconcileResult<bool> {
        let item = self
            .db
            .find_item_by_provider_id(&event.provider_item_id)
            .await?
            .ok_or_else(|| ReconcileError::not_found("item", event.provider_item_id.clone()))?;

        if item.archived {
            info!(item_id = item.id, "Item archived, not flagging sync");
            return Ok(false);
        }

        let has_cursor = item.transaction_cursor.is_some();
        if !should_flag(has_cursor, event.historical_update_complete) {
            debug!(
                item_id = item.id,
                initial_update_complete = event.initial_update_complete,
                "Historical backfill incomplete, not flagging sync"
            );
            return Ok(false);
        }

        self.db.set_sync_flag(item.id, true).await?;
        info!(item_id = item.id, has_cursor, "Item flagged for transaction sync");
        Ok(true)
    }
}
