//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the database and make sure an encryption key is usable
//! - Construct every service once, in dependency order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The provider is injected so tests can substitute a fake

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::config::ServiceConfig;
use crate::crypto::{CipherError, KeyManager, SecretCipher};
use crate::links::LinkTokenIssuer;
use crate::provider::{ProviderApi, ProviderGateway};
use crate::reconcile::LinkSessionCompleter;
use crate::storage::{Database, StorageError};
use crate::sync::{SyncSettings, TransactionSyncer};
use crate::webhooks::WebhookProcessor;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("encryption key check failed: {0}")]
    Key(#[from] CipherError),

    #[error("provider client could not be built: {0}")]
    Provider(#[from] reqwest::Error),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Every long-lived service, constructed once per process.
pub struct Services {
    pub db: Database,
    pub cipher: Arc<SecretCipher>,
    pub keys: KeyManager,
    pub provider: Arc<dyn ProviderApi>,
    pub syncer: Arc<TransactionSyncer>,
    pub webhooks: WebhookProcessor,
    pub links: LinkTokenIssuer,
}

impl Services {
    /// Wire services around an open database and a provider implementation.
    pub fn new(db: Database, provider: Arc<dyn ProviderApi>, config: &ServiceConfig) -> Self {
        let cipher = Arc::new(SecretCipher::new(
            Arc::new(db.clone()),
            config.encryption.key_name.clone(),
        ));
        let keys = KeyManager::new(db.clone(), cipher.clone());
        let syncer = Arc::new(TransactionSyncer::new(
            db.clone(),
            cipher.clone(),
            provider.clone(),
            SyncSettings::from(&config.sync),
        ));
        let sessions = Arc::new(LinkSessionCompleter::new(
            db.clone(),
            cipher.clone(),
            provider.clone(),
            syncer.clone(),
        ));
        let webhooks = WebhookProcessor::new(db.clone(), sessions);
        let links = LinkTokenIssuer::new(db.clone(), cipher.clone(), provider.clone());

        Self {
            db,
            cipher,
            keys,
            provider,
            syncer,
            webhooks,
            links,
        }
    }
}

/// Open storage, build the real provider gateway and verify the key.
pub async fn initialize(config: &ServiceConfig) -> Result<Services, StartupError> {
    let db = Database::connect(
        &config.database,
        Duration::from_secs(config.timeouts.storage_acquire_secs),
    )
    .await?;

    let gateway = ProviderGateway::new(
        &config.provider,
        Duration::from_secs(config.timeouts.provider_secs),
    )?;

    let services = Services::new(db, Arc::new(gateway), config);
    let key_id = services
        .keys
        .ensure_active_key(config.encryption.generate_if_missing)
        .await?;

    info!(
        key_name = %config.encryption.key_name,
        key_id,
        provider = %config.provider.base_url,
        "Services initialized"
    );
    Ok(services)
}
