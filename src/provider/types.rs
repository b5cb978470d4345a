//! Provider-facing types and error definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::resilience::Elapsed;
use crate::storage::TransactionSnapshot;

/// Error code the provider returns when data changed mid-pagination.
pub const MUTATION_DURING_PAGINATION: &str = "TRANSACTIONS_SYNC_MUTATION_DURING_PAGINATION";

/// Errors from provider calls. All are transient from this service's view.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with an error object.
    #[error("provider rejected {endpoint}: {error_type}/{code}: {message}")]
    Api {
        endpoint: &'static str,
        status: u16,
        error_type: String,
        code: String,
        message: String,
    },

    #[error("provider call {endpoint} {elapsed}")]
    Timeout {
        endpoint: &'static str,
        elapsed: Elapsed,
    },

    #[error("provider call {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {endpoint}: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Provider error code, when the provider supplied one.
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_mutation_during_pagination(&self) -> bool {
        self.provider_code() == Some(MUTATION_DURING_PAGINATION)
    }

    /// Stable code for logs and audit rows.
    pub fn code(&self) -> &str {
        match self {
            Self::Api { code, .. } => code,
            Self::Timeout { .. } => "PROVIDER_TIMEOUT",
            Self::Transport { .. } => "PROVIDER_UNAVAILABLE",
            Self::Decode { .. } => "PROVIDER_BAD_RESPONSE",
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result of a public token exchange.
#[derive(Clone)]
pub struct TokenExchange {
    pub access_token: String,
    pub item_id: String,
}

impl fmt::Debug for TokenExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchange")
            .field("access_token", &"<redacted>")
            .field("item_id", &self.item_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMetadata {
    pub item_id: String,
    pub institution_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Institution {
    pub institution_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionPage {
    pub added: Vec<TransactionSnapshot>,
    pub modified: Vec<TransactionSnapshot>,
    pub removed: Vec<String>,
    pub next_cursor: String,
    pub has_more: bool,
}

/// Per-request part of a link token; static settings come from config.
#[derive(Clone, Default)]
pub struct LinkTokenRequest {
    pub client_user_id: String,
    /// Present for update mode.
    pub access_token: Option<String>,
}

impl fmt::Debug for LinkTokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkTokenRequest")
            .field("client_user_id", &self.client_user_id)
            .field("update_mode", &self.access_token.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CreatedLinkToken {
    pub link_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let api = ProviderError::Api {
            endpoint: "/transactions/sync",
            status: 400,
            error_type: "TRANSACTIONS_ERROR".to_string(),
            code: MUTATION_DURING_PAGINATION.to_string(),
            message: "retry".to_string(),
        };
        assert!(api.is_mutation_during_pagination());
        assert_eq!(api.code(), MUTATION_DURING_PAGINATION);

        let timeout = ProviderError::Timeout {
            endpoint: "/item/get",
            elapsed: Elapsed(std::time::Duration::from_secs(1)),
        };
        assert_eq!(timeout.code(), "PROVIDER_TIMEOUT");
        assert!(timeout.provider_code().is_none());
    }

    #[test]
    fn test_debug_redacts_access_token() {
        let exchange = TokenExchange {
            access_token: "access-sandbox-secret".to_string(),
            item_id: "it-1".to_string(),
        };
        let rendered = format!("{exchange:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("it-1"));
    }
}
