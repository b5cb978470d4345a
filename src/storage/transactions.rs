//! Transaction persistence for the pull-based sync.

use crate::storage::error::Result;
use crate::storage::models::{Transaction, TransactionChanges, TransactionSyncCounts};
use crate::storage::{now_millis, Database};

impl Database {
    /// Apply one complete sync run and advance the item's cursor atomically.
    ///
    /// Transactions for accounts this item does not know are skipped.
    pub async fn apply_transaction_sync(
        &self,
        item_id: i64,
        changes: &TransactionChanges,
        next_cursor: &str,
    ) -> Result<TransactionSyncCounts> {
        let accounts = self.account_ids_for_item(item_id).await?;
        let now = now_millis();
        let mut counts = TransactionSyncCounts::default();
        let mut tx = self.pool.begin().await?;

        for txn in changes.added.iter().chain(changes.modified.iter()) {
            let Some(account_id) = accounts.get(&txn.provider_account_id) else {
                tracing::warn!(
                    item_id,
                    provider_account_id = %txn.provider_account_id,
                    "Skipping transaction for unknown account"
                );
                counts.skipped += 1;
                continue;
            };

            sqlx::query(
                r#"INSERT INTO transactions (
                       item_id, account_id, provider_transaction_id, amount, iso_currency_code,
                       date, name, merchant_name, category, pending, archived,
                       created_at, updated_at
                   )
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                   ON CONFLICT(provider_transaction_id) DO UPDATE SET
                       account_id = excluded.account_id,
                       amount = excluded.amount,
                       iso_currency_code = excluded.iso_currency_code,
                       date = excluded.date,
                       name = excluded.name,
                       merchant_name = excluded.merchant_name,
                       category = excluded.category,
                       pending = excluded.pending,
                       archived = 0,
                       updated_at = excluded.updated_at"#,
            )
            .bind(item_id)
            .bind(account_id)
            .bind(&txn.provider_transaction_id)
            .bind(txn.amount)
            .bind(&txn.iso_currency_code)
            .bind(&txn.date)
            .bind(&txn.name)
            .bind(&txn.merchant_name)
            .bind(&txn.category)
            .bind(txn.pending)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            counts.upserted += 1;
        }

        for provider_transaction_id in &changes.removed {
            let result = sqlx::query(
                r#"UPDATE transactions SET archived = 1, updated_at = ?
                   WHERE provider_transaction_id = ? AND item_id = ?"#,
            )
            .bind(now)
            .bind(provider_transaction_id)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
            counts.removed += result.rows_affected() as u32;
        }

        sqlx::query(
            r#"UPDATE items SET transaction_cursor = ?, has_sync_updates = 0, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(next_cursor)
        .bind(now)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(counts)
    }

    /// Archive every transaction of an item. Returns rows touched.
    pub async fn archive_transactions_for_item(&self, item_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE transactions SET archived = 1, updated_at = ? WHERE item_id = ? AND archived = 0",
        )
        .bind(now_millis())
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn transactions_for_item(&self, item_id: i64) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(
            r#"SELECT id, item_id, account_id, provider_transaction_id, amount, date, name,
                      pending, archived
               FROM transactions WHERE item_id = ? ORDER BY date, id"#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
