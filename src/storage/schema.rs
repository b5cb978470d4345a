//! Schema creation for all tables.
//!
//! All CREATE TABLE statements live here - single source of truth.
//! Uniqueness that the reconciliation logic depends on is enforced here,
//! not in application code.

use tracing::info;

use crate::storage::error::Result;
use crate::storage::Database;

impl Database {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        self.create_key_tables().await?;
        self.create_item_tables().await?;
        self.create_link_tables().await?;
        self.create_webhook_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    async fn create_key_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS encryption_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key_name TEXT NOT NULL,
                version INTEGER NOT NULL,
                key_material TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                deactivated_at INTEGER,
                UNIQUE (key_name, version)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // One active key per logical name
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_encryption_keys_active
               ON encryption_keys(key_name) WHERE is_active = 1"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_item_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL,
                provider_item_id TEXT NOT NULL UNIQUE,
                institution_id TEXT,
                institution_name TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                last_error_code TEXT,
                last_error_message TEXT,
                last_error_at INTEGER,
                access_token_ciphertext BLOB NOT NULL,
                access_token_key_id INTEGER NOT NULL REFERENCES encryption_keys(id),
                transaction_cursor TEXT,
                has_sync_updates INTEGER NOT NULL DEFAULT 0,
                archived INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // At most one open connection per (client, institution)
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_items_client_institution_open
               ON items(client_id, institution_id)
               WHERE archived = 0 AND institution_id IS NOT NULL"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                provider_account_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                official_name TEXT,
                mask TEXT,
                account_type TEXT,
                subtype TEXT,
                current_balance REAL,
                available_balance REAL,
                iso_currency_code TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_accounts_item ON accounts(item_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                provider_transaction_id TEXT NOT NULL UNIQUE,
                amount REAL NOT NULL,
                iso_currency_code TEXT,
                date TEXT NOT NULL,
                name TEXT NOT NULL,
                merchant_name TEXT,
                category TEXT,
                pending INTEGER NOT NULL DEFAULT 0,
                archived INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_item ON transactions(item_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_link_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS link_tokens (
                token TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                mode TEXT NOT NULL DEFAULT 'create',
                item_id INTEGER REFERENCES items(id),
                status TEXT NOT NULL DEFAULT 'pending',
                last_session_status TEXT,
                last_error_code TEXT,
                last_error_message TEXT,
                expires_at INTEGER,
                created_at INTEGER NOT NULL,
                used_at INTEGER
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Append-only attempt history; no FK so unknown tokens can be recorded too
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS link_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_token TEXT NOT NULL,
                link_session_id TEXT,
                status TEXT NOT NULL,
                error_type TEXT,
                error_code TEXT,
                error_message TEXT,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_link_sessions_token ON link_sessions(link_token)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_webhook_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS webhook_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL,
                webhook_type TEXT NOT NULL,
                webhook_code TEXT NOT NULL,
                provider_item_id TEXT,
                payload TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                attempts INTEGER NOT NULL DEFAULT 1,
                received_at INTEGER NOT NULL,
                claimed_at INTEGER NOT NULL,
                processed_at INTEGER
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // At most one unfinished row per fingerprint
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_webhook_log_open
               ON webhook_log(fingerprint) WHERE processed = 0"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_webhook_log_fingerprint ON webhook_log(fingerprint, id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
