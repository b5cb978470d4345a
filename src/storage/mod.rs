//! Relational storage subsystem.
//!
//! # Data Flow
//! ```text
//! services (webhooks, reconcile, sync, links, crypto)
//!     → Database (typed methods, parameterized queries)
//!     → sqlx SQLite pool (bounded acquire timeout)
//! ```
//!
//! # Design Decisions
//! - `Database` is the only way to touch the store; no raw sqlx elsewhere
//! - One `impl Database` block per entity file
//! - Timestamps are INTEGER unix milliseconds
//! - UNIQUE constraints, not application checks, decide webhook dedup and
//!   item identity under concurrent deliveries

pub mod accounts;
pub mod error;
pub mod items;
pub mod keys;
pub mod link_tokens;
pub mod models;
mod schema;
pub mod transactions;
pub mod webhook_log;

pub use error::{Result, StorageError};
pub use models::*;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;

/// Handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database described by `config`.
    ///
    /// Creates all tables if they don't exist.
    pub async fn connect(config: &DatabaseConfig, acquire_timeout: Duration) -> Result<Self> {
        let in_memory = is_memory_url(&config.url);

        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(acquire_timeout);
        if in_memory {
            // Each connection would otherwise see its own empty database
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        let db = Self { pool };
        db.ensure_schema().await?;

        info!(url = %config.url, "Database opened");
        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };
        Self::connect(&config, Duration::from_secs(5)).await
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool. Subsequent calls fail with a pool-closed error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Current time as milliseconds since Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert milliseconds to DateTime.
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}
