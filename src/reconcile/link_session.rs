//! Completing a finished link session.
//!
//! Each public token is exchanged, resolved onto an item, and has its
//! accounts reconciled independently: one token failing never aborts or
//! touches the rows of another, and a later token never takes over an item
//! an earlier one linked. The link token is marked used once, after
//! every token has been attempted.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::crypto::SecretCipher;
use crate::error::{ReconcileError, ReconcileResult};
use crate::observability::metrics;
use crate::provider::ProviderApi;
use crate::reconcile::best_effort::{fire_and_log, BestEffort};
use crate::reconcile::resolution::{resolve_item, ItemResolution};
use crate::storage::{
    AccountSyncSummary, Database, ErrorFields, Item, ItemCredentials, ItemStatus, LinkMode,
    LinkSessionRecord, LinkToken, LinkTokenStatus, NewItem,
};
use crate::sync::TransactionSyncer;
use crate::webhooks::LinkSessionEvent;

/// What completing a session did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The link token had already been consumed by an earlier delivery.
    AlreadyUsed,
    /// The user exited or the session errored; history recorded, token left pending.
    NotCompleted { status: String },
    /// Update-mode session that repaired an item without issuing new tokens.
    ItemRepaired { item_id: i64 },
    Completed {
        linked: Vec<LinkedItem>,
        failed: Vec<TokenFailure>,
    },
}

impl SessionOutcome {
    /// Error code to record on the webhook log row, if any token failed.
    pub fn error_code(&self) -> Option<String> {
        match self {
            Self::Completed { linked, failed } if !failed.is_empty() => {
                if linked.is_empty() {
                    Some(failed[0].error.clone())
                } else {
                    Some("PARTIAL_FAILURE".to_string())
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkedItem {
    pub item_id: i64,
    pub resolution: &'static str,
    pub accounts: AccountSyncSummary,
    pub initial_sync: BestEffort,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenFailure {
    /// Position of the token in the session, never the token itself.
    pub index: usize,
    pub error: String,
}

pub struct LinkSessionCompleter {
    db: Database,
    cipher: Arc<SecretCipher>,
    provider: Arc<dyn ProviderApi>,
    syncer: Arc<TransactionSyncer>,
}

impl LinkSessionCompleter {
    pub fn new(
        db: Database,
        cipher: Arc<SecretCipher>,
        provider: Arc<dyn ProviderApi>,
        syncer: Arc<TransactionSyncer>,
    ) -> Self {
        Self {
            db,
            cipher,
            provider,
            syncer,
        }
    }

    pub async fn complete(&self, event: &LinkSessionEvent) -> ReconcileResult<SessionOutcome> {
        let token = self.db.get_link_token(&event.link_token).await?;

        let token = match token {
            Some(token) if token.status == LinkTokenStatus::Used => {
                info!(link_session_id = ?event.link_session_id, "Link token already used, skipping");
                return Ok(SessionOutcome::AlreadyUsed);
            }
            Some(token) => token,
            None => {
                // Keep the attempt visible even though nothing can be linked
                self.record_history(event).await;
                return Err(ReconcileError::not_found("link token", redact(&event.link_token)));
            }
        };

        self.record_history(event).await;

        if !event.is_success() {
            info!(
                client_id = %token.client_id,
                status = %event.status,
                "Link session did not succeed, nothing to exchange"
            );
            return Ok(SessionOutcome::NotCompleted {
                status: event.status.clone(),
            });
        }

        if event.public_tokens.is_empty() {
            return self.complete_without_tokens(&token).await;
        }

        let mut linked: Vec<LinkedItem> = Vec::new();
        let mut failed = Vec::new();
        let mut retryable = None;
        for (index, public_token) in event.public_tokens.iter().enumerate() {
            let linked_ids: Vec<i64> = linked.iter().map(|item| item.item_id).collect();
            match self.link_one(&token.client_id, public_token, &linked_ids).await {
                Ok(item) => {
                    metrics::record_link_token_outcome("linked");
                    linked.push(item);
                }
                Err(e) => {
                    metrics::record_link_token_outcome("failed");
                    if matches!(e, ReconcileError::DuplicateConflict { .. }) {
                        error!(client_id = %token.client_id, index, error = %e, "Duplicate conflict, operator action required");
                    } else {
                        warn!(client_id = %token.client_id, index, error = %e, "Public token failed");
                    }
                    failed.push(TokenFailure {
                        index,
                        error: e.code(),
                    });
                    if e.is_retryable() && retryable.is_none() {
                        retryable = Some(e);
                    }
                }
            }
        }

        // Siblings have been attempted; leave the token pending for redelivery
        if let Some(e) = retryable {
            return Err(e);
        }

        self.db.mark_link_token_used(&token.token).await?;
        info!(
            client_id = %token.client_id,
            linked = linked.len(),
            failed = failed.len(),
            "Link session completed"
        );
        Ok(SessionOutcome::Completed { linked, failed })
    }

    /// Steps 5 to 8 for one public token, isolated to its own item.
    ///
    /// `linked_in_session` holds the items earlier tokens landed on; they are
    /// never taken over as duplicates.
    async fn link_one(
        &self,
        client_id: &str,
        public_token: &str,
        linked_in_session: &[i64],
    ) -> ReconcileResult<LinkedItem> {
        let exchange = self.provider.exchange_public_token(public_token).await?;
        let metadata = self.provider.get_item(&exchange.access_token).await?;
        let institution_id = metadata.institution_id.as_deref();
        let institution_name = match institution_id {
            Some(id) => match self.provider.get_institution(id).await {
                Ok(institution) => Some(institution.name),
                Err(e) => {
                    warn!(institution_id = id, error = %e, "Institution lookup failed, continuing without name");
                    None
                }
            },
            None => None,
        };

        let sealed = self.cipher.encrypt_str(&exchange.access_token).await?;
        let resolution = resolve_item(
            &self.db,
            client_id,
            &exchange.item_id,
            institution_id,
            linked_in_session,
        )
        .await?;
        let label = resolution.label();

        let credentials = ItemCredentials {
            provider_item_id: exchange.item_id.clone(),
            institution_name: institution_name.clone(),
            access_token_ciphertext: sealed.ciphertext.clone(),
            access_token_key_id: sealed.key_id,
        };

        let item_id = match resolution {
            ItemResolution::UpdateMode { existing } => {
                self.db.reauthorize_item(existing.id, &credentials).await?;
                existing.id
            }
            ItemResolution::ReplaceDuplicate { existing } => {
                self.revoke_old_connection(&existing).await;
                self.db.replace_item_connection(existing.id, &credentials).await?;
                existing.id
            }
            ItemResolution::Create => {
                let item = self
                    .db
                    .insert_item(&NewItem {
                        client_id: client_id.to_string(),
                        provider_item_id: exchange.item_id.clone(),
                        institution_id: metadata.institution_id.clone(),
                        institution_name,
                        access_token_ciphertext: sealed.ciphertext,
                        access_token_key_id: sealed.key_id,
                    })
                    .await?;
                item.id
            }
        };
        metrics::record_status_transition(ItemStatus::Active.as_str());
        info!(item_id, provider_item_id = %exchange.item_id, resolution = label, "Item linked");

        let snapshots = self.provider.get_accounts(&exchange.access_token).await?;
        let accounts = self.db.sync_item_accounts(item_id, &snapshots).await?;

        let initial_sync = fire_and_log("initial transaction sync", self.syncer.sync_item(item_id)).await;

        Ok(LinkedItem {
            item_id,
            resolution: label,
            accounts,
            initial_sync,
        })
    }

    /// Successful update-mode sessions may carry no public token at all.
    async fn complete_without_tokens(&self, token: &LinkToken) -> ReconcileResult<SessionOutcome> {
        let (LinkMode::Update, Some(item_id)) = (token.mode, token.item_id) else {
            return Err(ReconcileError::validation(
                "successful session carried no public tokens",
            ));
        };

        let item = self
            .db
            .get_item(item_id)
            .await?
            .ok_or_else(|| ReconcileError::not_found("item", item_id.to_string()))?;
        if !item.archived {
            self.db
                .set_item_status(item.id, ItemStatus::Active, &ErrorFields::Clear)
                .await?;
            metrics::record_status_transition(ItemStatus::Active.as_str());
        }
        self.db.mark_link_token_used(&token.token).await?;
        info!(item_id, "Update-mode session repaired item");
        Ok(SessionOutcome::ItemRepaired { item_id })
    }

    async fn revoke_old_connection(&self, existing: &Item) -> BestEffort {
        let revoke = async {
            let access_token = self
                .cipher
                .decrypt_to_string(&existing.access_token_ciphertext, existing.access_token_key_id)
                .await
                .map_err(ReconcileError::from)?;
            self.provider
                .remove_item(&access_token)
                .await
                .map_err(ReconcileError::from)
        };
        fire_and_log("revoke duplicate provider item", revoke).await
    }

    async fn record_history(&self, event: &LinkSessionEvent) {
        let record = LinkSessionRecord {
            link_token: event.link_token.clone(),
            link_session_id: event.link_session_id.clone(),
            status: event.status.to_ascii_lowercase(),
            error_type: event.error.as_ref().and_then(|e| e.error_type.clone()),
            error_code: event.error.as_ref().map(|e| e.code.clone()),
            error_message: event.error.as_ref().and_then(|e| e.message.clone()),
        };
        fire_and_log("record link session", self.db.record_link_session(&record)).await;
    }
}

/// Link tokens are bearer credentials; keep only a prefix in errors and logs.
fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(12).collect();
    format!("{prefix}...")
}
