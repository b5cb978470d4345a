//! Row types shared by the storage layer and the reconciliation services.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::error::StorageError;
use crate::storage::millis_to_datetime;

/// Connection health of an item as seen by the CPA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    LoginRequired,
    NeedsUpdate,
    Error,
    Archived,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::LoginRequired => "login_required",
            Self::NeedsUpdate => "needs_update",
            Self::Error => "error",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "login_required" => Ok(Self::LoginRequired),
            "needs_update" => Ok(Self::NeedsUpdate),
            "error" => Ok(Self::Error),
            "archived" => Ok(Self::Archived),
            other => Err(StorageError::corrupt(format!("unknown item status '{other}'"))),
        }
    }
}

/// One provider bank connection.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub id: i64,
    pub client_id: String,
    pub provider_item_id: String,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    pub status: ItemStatus,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub access_token_ciphertext: Vec<u8>,
    pub access_token_key_id: i64,
    pub transaction_cursor: Option<String>,
    pub has_sync_updates: bool,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub id: i64,
    pub client_id: String,
    pub provider_item_id: String,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    pub status: String,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub last_error_at: Option<i64>,
    pub access_token_ciphertext: Vec<u8>,
    pub access_token_key_id: i64,
    pub transaction_cursor: Option<String>,
    pub has_sync_updates: bool,
    pub archived: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<ItemRow> for Item {
    type Error = StorageError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            client_id: row.client_id,
            provider_item_id: row.provider_item_id,
            institution_id: row.institution_id,
            institution_name: row.institution_name,
            status: row.status.parse()?,
            last_error_code: row.last_error_code,
            last_error_message: row.last_error_message,
            last_error_at: row.last_error_at.map(millis_to_datetime),
            access_token_ciphertext: row.access_token_ciphertext,
            access_token_key_id: row.access_token_key_id,
            transaction_cursor: row.transaction_cursor,
            has_sync_updates: row.has_sync_updates,
            archived: row.archived,
            created_at: millis_to_datetime(row.created_at),
            updated_at: millis_to_datetime(row.updated_at),
        })
    }
}

/// Values for a brand-new item.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub client_id: String,
    pub provider_item_id: String,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    pub access_token_ciphertext: Vec<u8>,
    pub access_token_key_id: i64,
}

/// Freshly exchanged credentials written over an existing item.
#[derive(Debug, Clone)]
pub struct ItemCredentials {
    pub provider_item_id: String,
    pub institution_name: Option<String>,
    pub access_token_ciphertext: Vec<u8>,
    pub access_token_key_id: i64,
}

/// What a status transition does to the last-error columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorFields {
    Keep,
    Record { code: String, message: Option<String> },
    Clear,
}

/// Bank account under an item.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub item_id: i64,
    pub provider_account_id: String,
    pub name: String,
    pub official_name: Option<String>,
    pub mask: Option<String>,
    pub account_type: Option<String>,
    pub subtype: Option<String>,
    pub current_balance: Option<f64>,
    pub available_balance: Option<f64>,
    pub iso_currency_code: Option<String>,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Account as reported by the provider's account list.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub provider_account_id: String,
    pub name: String,
    pub official_name: Option<String>,
    pub mask: Option<String>,
    pub account_type: Option<String>,
    pub subtype: Option<String>,
    pub current_balance: Option<f64>,
    pub available_balance: Option<f64>,
    pub iso_currency_code: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountSyncSummary {
    pub inserted: u32,
    pub updated: u32,
    pub deactivated: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    Create,
    Update,
}

impl LinkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl FromStr for LinkMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            other => Err(StorageError::corrupt(format!("unknown link mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkTokenStatus {
    Pending,
    Used,
}

impl FromStr for LinkTokenStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "used" => Ok(Self::Used),
            other => Err(StorageError::corrupt(format!("unknown link token status '{other}'"))),
        }
    }
}

/// A user-facing connection attempt.
#[derive(Debug, Clone, Serialize)]
pub struct LinkToken {
    pub token: String,
    pub client_id: String,
    pub mode: LinkMode,
    pub item_id: Option<i64>,
    pub status: LinkTokenStatus,
    pub last_session_status: Option<String>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LinkTokenRow {
    pub token: String,
    pub client_id: String,
    pub mode: String,
    pub item_id: Option<i64>,
    pub status: String,
    pub last_session_status: Option<String>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub used_at: Option<i64>,
}

impl TryFrom<LinkTokenRow> for LinkToken {
    type Error = StorageError;

    fn try_from(row: LinkTokenRow) -> Result<Self, Self::Error> {
        Ok(Self {
            token: row.token,
            client_id: row.client_id,
            mode: row.mode.parse()?,
            item_id: row.item_id,
            status: row.status.parse()?,
            last_session_status: row.last_session_status,
            last_error_code: row.last_error_code,
            last_error_message: row.last_error_message,
            expires_at: row.expires_at.map(millis_to_datetime),
            created_at: millis_to_datetime(row.created_at),
            used_at: row.used_at.map(millis_to_datetime),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewLinkToken {
    pub token: String,
    pub client_id: String,
    pub mode: LinkMode,
    pub item_id: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One row of CPA-facing link history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LinkSessionRecord {
    pub link_token: String,
    pub link_session_id: Option<String>,
    pub status: String,
    pub error_type: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Append-only audit and idempotency record for one webhook delivery.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WebhookLogEntry {
    pub id: i64,
    pub fingerprint: String,
    pub webhook_type: String,
    pub webhook_code: String,
    pub provider_item_id: Option<String>,
    pub payload: String,
    pub processed: bool,
    pub error: Option<String>,
    pub attempts: i64,
    pub received_at: i64,
    pub claimed_at: i64,
    pub processed_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookLog<'a> {
    pub fingerprint: &'a str,
    pub webhook_type: &'a str,
    pub webhook_code: &'a str,
    pub provider_item_id: Option<&'a str>,
    pub payload: &'a str,
}

/// Time bounds applied when claiming a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryWindows {
    /// Age after which an unfinished claim may be taken over.
    pub reclaim_after: Duration,
    /// Age after which a processed delivery no longer suppresses an identical body.
    pub dedup_window: Duration,
}

/// Result of trying to take ownership of a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First sighting of this fingerprint within the dedup window.
    Fresh(i64),
    /// Earlier attempt never finished and its lease expired.
    Reclaimed(i64),
    /// Processed within the dedup window, or another delivery holds a live claim.
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WebhookLogStats {
    pub total: i64,
    pub unprocessed: i64,
    pub failed: i64,
}

/// Versioned symmetric key row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EncryptionKeyRecord {
    pub id: i64,
    pub key_name: String,
    pub version: i64,
    pub key_material: String,
    pub is_active: bool,
    pub created_at: i64,
    pub deactivated_at: Option<i64>,
}

/// Transaction as reported by the provider's sync endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSnapshot {
    pub provider_transaction_id: String,
    pub provider_account_id: String,
    pub amount: f64,
    pub iso_currency_code: Option<String>,
    pub date: String,
    pub name: String,
    pub merchant_name: Option<String>,
    pub category: Option<String>,
    pub pending: bool,
}

/// Accumulated changes from one complete sync run.
#[derive(Debug, Clone, Default)]
pub struct TransactionChanges {
    pub added: Vec<TransactionSnapshot>,
    pub modified: Vec<TransactionSnapshot>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionSyncCounts {
    pub upserted: u32,
    pub removed: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub item_id: i64,
    pub account_id: i64,
    pub provider_transaction_id: String,
    pub amount: f64,
    pub date: String,
    pub name: String,
    pub pending: bool,
    pub archived: bool,
}
