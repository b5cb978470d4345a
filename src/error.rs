//! Crate-level error taxonomy for event processing.

use thiserror::Error;

use crate::crypto::CipherError;
use crate::provider::ProviderError;
use crate::storage::StorageError;

/// Why processing an event (or one token of a session) did not succeed.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Malformed event: nothing to act on.
    #[error("invalid event: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Linking this provider item would contradict an item already on file.
    #[error("duplicate conflict for provider item {provider_item_id}: {kind}")]
    DuplicateConflict {
        provider_item_id: String,
        kind: ConflictKind,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(CipherError),
}

/// Why a duplicate could not be resolved automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictKind {
    /// Update-mode re-auth landed on a different institution than the one on file.
    #[error("institution mismatch: stored {stored}, received {received}")]
    InstitutionMismatch { stored: String, received: String },

    /// Re-auth would reopen an archived item while the client holds another
    /// open item at the same institution.
    #[error("archived item superseded by open item {open_item_id}")]
    ArchivedSuperseded { open_item_id: i64 },

    /// An earlier token of the same session already linked this institution.
    #[error("institution already linked as item {item_id} in this session")]
    LinkedInSession { item_id: i64 },
}

impl ConflictKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InstitutionMismatch { .. } => "INSTITUTION_MISMATCH",
            Self::ArchivedSuperseded { .. } => "ARCHIVED_ITEM_SUPERSEDED",
            Self::LinkedInSession { .. } => "INSTITUTION_ALREADY_LINKED",
        }
    }
}

impl From<CipherError> for ReconcileError {
    fn from(err: CipherError) -> Self {
        match err {
            // A failed key lookup is a storage problem, not a crypto one
            CipherError::Storage(storage) => Self::Storage(storage),
            other => Self::Crypto(other),
        }
    }
}

impl ReconcileError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Only transient storage failures warrant upstream redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_transient())
    }

    /// Stable code recorded on webhook log rows and link tokens.
    pub fn code(&self) -> String {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR".to_string(),
            Self::NotFound { .. } => "NOT_FOUND".to_string(),
            Self::DuplicateConflict { kind, .. } => kind.code().to_string(),
            Self::Provider(e) => e.code().to_string(),
            Self::Storage(e) if e.is_transient() => "STORAGE_UNAVAILABLE".to_string(),
            Self::Storage(e) if e.is_unique_violation() => "STORAGE_CONFLICT".to_string(),
            Self::Storage(_) => "STORAGE_ERROR".to_string(),
            Self::Crypto(CipherError::AuthenticationFailure) => "DECRYPTION_FAILED".to_string(),
            Self::Crypto(CipherError::KeyNotFound(_) | CipherError::KeyInactive(_)) => {
                "ENCRYPTION_KEY_UNAVAILABLE".to_string()
            }
            Self::Crypto(_) => "ENCRYPTION_ERROR".to_string(),
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
