//! Item (bank connection) persistence.

use crate::storage::error::{Result, StorageError};
use crate::storage::models::{ErrorFields, Item, ItemCredentials, ItemRow, ItemStatus, NewItem};
use crate::storage::{now_millis, Database};

const ITEM_COLUMNS: &str = r#"
    id, client_id, provider_item_id, institution_id, institution_name, status,
    last_error_code, last_error_message, last_error_at,
    access_token_ciphertext, access_token_key_id, transaction_cursor,
    has_sync_updates, archived, created_at, updated_at
"#;

impl Database {
    pub async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Item::try_from).transpose()
    }

    pub async fn find_item_by_provider_id(&self, provider_item_id: &str) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE provider_item_id = ?"
        ))
        .bind(provider_item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Item::try_from).transpose()
    }

    /// The client's non-archived item at an institution, if any.
    pub async fn find_open_item_for_institution(
        &self,
        client_id: &str,
        institution_id: &str,
    ) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            r#"SELECT {ITEM_COLUMNS} FROM items
               WHERE client_id = ? AND institution_id = ? AND archived = 0
               ORDER BY id DESC LIMIT 1"#
        ))
        .bind(client_id)
        .bind(institution_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Item::try_from).transpose()
    }

    /// Insert a new item in `active` status.
    pub async fn insert_item(&self, item: &NewItem) -> Result<Item> {
        let now = now_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO items (
                client_id, provider_item_id, institution_id, institution_name, status,
                access_token_ciphertext, access_token_key_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, 'active', ?, ?, ?, ?)
            "#,
        )
        .bind(&item.client_id)
        .bind(&item.provider_item_id)
        .bind(&item.institution_id)
        .bind(&item.institution_name)
        .bind(&item.access_token_ciphertext)
        .bind(item.access_token_key_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_item(id)
            .await?
            .ok_or_else(|| StorageError::corrupt(format!("item {id} vanished after insert")))
    }

    /// Set the status column and adjust the last-error columns.
    pub async fn set_item_status(
        &self,
        id: i64,
        status: ItemStatus,
        errors: &ErrorFields,
    ) -> Result<bool> {
        let now = now_millis();
        let result = match errors {
            ErrorFields::Keep => {
                sqlx::query("UPDATE items SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            ErrorFields::Record { code, message } => {
                sqlx::query(
                    r#"UPDATE items
                       SET status = ?, last_error_code = ?, last_error_message = ?,
                           last_error_at = ?, updated_at = ?
                       WHERE id = ?"#,
                )
                .bind(status.as_str())
                .bind(code)
                .bind(message)
                .bind(now)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            ErrorFields::Clear => {
                sqlx::query(
                    r#"UPDATE items
                       SET status = ?, last_error_code = NULL, last_error_message = NULL,
                           last_error_at = NULL, updated_at = ?
                       WHERE id = ?"#,
                )
                .bind(status.as_str())
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    /// Archive an item and deactivate all of its accounts atomically.
    ///
    /// Returns the number of accounts deactivated.
    pub async fn archive_item_cascade(&self, id: i64) -> Result<u64> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE items SET status = 'archived', archived = 1, has_sync_updates = 0, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let accounts = sqlx::query(
            "UPDATE accounts SET active = 0, updated_at = ? WHERE item_id = ? AND active = 1",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(accounts.rows_affected())
    }

    /// Update-mode re-authorization: new token, errors cleared, active, unarchived.
    pub async fn reauthorize_item(&self, id: i64, credentials: &ItemCredentials) -> Result<()> {
        sqlx::query(
            r#"UPDATE items
               SET access_token_ciphertext = ?, access_token_key_id = ?,
                   institution_name = COALESCE(?, institution_name),
                   status = 'active', archived = 0,
                   last_error_code = NULL, last_error_message = NULL, last_error_at = NULL,
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&credentials.access_token_ciphertext)
        .bind(credentials.access_token_key_id)
        .bind(&credentials.institution_name)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Point an existing row at a different provider item.
    ///
    /// The cursor belongs to the old access token and is cleared.
    pub async fn replace_item_connection(
        &self,
        id: i64,
        credentials: &ItemCredentials,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE items
               SET provider_item_id = ?, access_token_ciphertext = ?, access_token_key_id = ?,
                   institution_name = COALESCE(?, institution_name),
                   transaction_cursor = NULL, has_sync_updates = 0,
                   status = 'active', archived = 0,
                   last_error_code = NULL, last_error_message = NULL, last_error_at = NULL,
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&credentials.provider_item_id)
        .bind(&credentials.access_token_ciphertext)
        .bind(credentials.access_token_key_id)
        .bind(&credentials.institution_name)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_sync_flag(&self, id: i64, has_sync_updates: bool) -> Result<()> {
        sqlx::query("UPDATE items SET has_sync_updates = ?, updated_at = ? WHERE id = ?")
            .bind(has_sync_updates)
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Open items flagged for a pull sync, oldest update first.
    ///
    /// `needs_update` items still hold a working token; `login_required` and
    /// `error` items would only fail against the provider.
    pub async fn items_pending_sync(&self, limit: u32) -> Result<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            r#"SELECT {ITEM_COLUMNS} FROM items
               WHERE has_sync_updates = 1 AND archived = 0
                 AND status IN ('active', 'needs_update')
               ORDER BY updated_at ASC LIMIT ?"#
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Item::try_from).collect()
    }

    /// Item counts keyed by status, for the admin status view.
    pub async fn item_status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM items GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
