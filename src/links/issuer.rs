//! Create-mode and update-mode link tokens.

use std::sync::Arc;

use tracing::info;

use crate::crypto::SecretCipher;
use crate::error::{ReconcileError, ReconcileResult};
use crate::provider::{LinkTokenRequest, ProviderApi};
use crate::storage::{Database, LinkMode, LinkToken, NewLinkToken};

pub struct LinkTokenIssuer {
    db: Database,
    cipher: Arc<SecretCipher>,
    provider: Arc<dyn ProviderApi>,
}

impl LinkTokenIssuer {
    pub fn new(db: Database, cipher: Arc<SecretCipher>, provider: Arc<dyn ProviderApi>) -> Self {
        Self {
            db,
            cipher,
            provider,
        }
    }

    /// Token for connecting a new institution for `client_id`.
    pub async fn create_for_client(&self, client_id: &str) -> ReconcileResult<LinkToken> {
        if client_id.trim().is_empty() {
            return Err(ReconcileError::validation("client_id is required"));
        }
        let request = LinkTokenRequest {
            client_user_id: client_id.to_string(),
            access_token: None,
        };
        self.issue(client_id, LinkMode::Create, None, &request).await
    }

    /// Token for repairing or extending an existing item ("send update link").
    pub async fn create_for_item(&self, item_id: i64) -> ReconcileResult<LinkToken> {
        let item = self
            .db
            .get_item(item_id)
            .await?
            .ok_or_else(|| ReconcileError::not_found("item", item_id.to_string()))?;
        if item.archived {
            return Err(ReconcileError::validation(format!(
                "item {item_id} is archived; start a new link instead"
            )));
        }

        let access_token = self
            .cipher
            .decrypt_to_string(&item.access_token_ciphertext, item.access_token_key_id)
            .await?;
        let request = LinkTokenRequest {
            client_user_id: item.client_id.clone(),
            access_token: Some(access_token),
        };
        self.issue(&item.client_id, LinkMode::Update, Some(item.id), &request)
            .await
    }

    async fn issue(
        &self,
        client_id: &str,
        mode: LinkMode,
        item_id: Option<i64>,
        request: &LinkTokenRequest,
    ) -> ReconcileResult<LinkToken> {
        let created = self.provider.create_link_token(request).await?;
        self.db
            .insert_link_token(&NewLinkToken {
                token: created.link_token.clone(),
                client_id: client_id.to_string(),
                mode,
                item_id,
                expires_at: created.expiration,
            })
            .await?;

        info!(client_id, mode = mode.as_str(), item_id = ?item_id, "Link token issued");
        self.db
            .get_link_token(&created.link_token)
            .await?
            .ok_or_else(|| ReconcileError::not_found("link token", "just issued"))
    }
}
