//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the link reconciler.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration for the webhook endpoint.
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Relational store settings.
    pub database: DatabaseConfig,

    /// Account-aggregation provider settings.
    pub provider: ProviderConfig,

    /// Envelope encryption settings.
    pub encryption: EncryptionConfig,

    /// Webhook intake settings.
    pub webhooks: WebhookConfig,

    /// Transaction sync settings.
    pub sync: SyncConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for inbound and outbound operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Inbound request timeout (whole webhook handling) in seconds.
    pub request_secs: u64,

    /// Per-call deadline for provider API requests in seconds.
    pub provider_secs: u64,

    /// Maximum wait for a pooled database connection in seconds.
    pub storage_acquire_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            provider_secs: 15,
            storage_acquire_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL (e.g., "sqlite://link-reconciler.db").
    pub url: String,

    /// Maximum pooled connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://link-reconciler.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Aggregation provider API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API base URL (sandbox, development or production host).
    pub base_url: String,

    /// API client id. Overridden by `PROVIDER_CLIENT_ID`.
    pub client_id: String,

    /// API secret. Overridden by `PROVIDER_SECRET`.
    pub secret: String,

    /// Name shown to end users in the link flow.
    pub client_name: String,

    /// Products requested when creating link tokens.
    pub products: Vec<String>,

    pub country_codes: Vec<String>,

    pub language: String,

    /// Webhook URL registered on new link tokens.
    pub webhook_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.plaid.com".to_string(),
            client_id: String::new(),
            secret: String::new(),
            client_name: "CPA Client Portal".to_string(),
            products: vec!["transactions".to_string()],
            country_codes: vec!["US".to_string()],
            language: "en".to_string(),
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Logical key name used for provider access tokens.
    pub key_name: String,

    /// Generate a fresh key at startup when no active key exists.
    pub generate_if_missing: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_name: "provider_access_token".to_string(),
            generate_if_missing: true,
        }
    }
}

/// Webhook intake configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Route the provider posts to.
    pub path: String,

    /// Maximum accepted body size in bytes.
    pub max_body_bytes: usize,

    /// Age after which an unprocessed log row may be claimed by a redelivery.
    pub reclaim_after_secs: u64,

    /// How long a processed delivery suppresses an identical body.
    ///
    /// Provider bodies carry no delivery id, so a recurring event (a second
    /// sync notice, a repeat login error) is indistinguishable from a
    /// redelivery except by age.
    pub dedup_window_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            path: "/webhooks/provider".to_string(),
            max_body_bytes: 256 * 1024,
            reclaim_after_secs: 120,
            dedup_window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Transactions requested per sync page.
    pub page_size: u32,

    /// Upper bound on pages fetched in one sync run.
    pub max_pages: u32,

    /// Items processed per sweep call.
    pub sweep_batch: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 250,
            max_pages: 40,
            sweep_batch: 25,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token). Overridden by `ADMIN_API_KEY`.
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
