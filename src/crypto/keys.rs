//! Key lookup and rotation.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use tracing::{info, warn};

use crate::crypto::cipher::{CipherError, KeyMaterial, SecretCipher, KEY_LEN};
use crate::storage::{Database, EncryptionKeyRecord};

/// Where the cipher fetches key material on a cache miss.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// The active key for a logical name.
    async fn active_key(&self, key_name: &str) -> Result<KeyMaterial, CipherError>;

    /// Any key, active or retired, by id.
    async fn key_by_id(&self, id: i64) -> Result<KeyMaterial, CipherError>;
}

fn decode_record(record: &EncryptionKeyRecord) -> Result<KeyMaterial, CipherError> {
    let bytes = BASE64
        .decode(record.key_material.as_bytes())
        .map_err(|_| CipherError::InvalidKey(record.id))?;
    KeyMaterial::new(record.id, &bytes)
}

#[async_trait]
impl KeySource for Database {
    async fn active_key(&self, key_name: &str) -> Result<KeyMaterial, CipherError> {
        match self.latest_key(key_name).await? {
            Some(record) if record.is_active => decode_record(&record),
            Some(_) => Err(CipherError::KeyInactive(key_name.to_string())),
            None => Err(CipherError::KeyNotFound(key_name.to_string())),
        }
    }

    async fn key_by_id(&self, id: i64) -> Result<KeyMaterial, CipherError> {
        let record = Database::key_by_id(self, id)
            .await?
            .ok_or_else(|| CipherError::KeyNotFound(format!("id {id}")))?;
        decode_record(&record)
    }
}

/// Result of a rotation, safe to return over the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct RotatedKey {
    pub key_id: i64,
    pub key_name: String,
    pub version: i64,
}

/// Creates and rotates the key rows the cipher reads from.
pub struct KeyManager {
    db: Database,
    cipher: Arc<SecretCipher>,
}

impl KeyManager {
    pub fn new(db: Database, cipher: Arc<SecretCipher>) -> Self {
        Self { db, cipher }
    }

    /// Make sure an active key exists for the cipher's key name.
    ///
    /// With `generate_if_missing` false, a missing or retired key is an error
    /// so that operators notice before the first link completes.
    pub async fn ensure_active_key(&self, generate_if_missing: bool) -> Result<i64, CipherError> {
        let key_name = self.cipher.key_name();
        match self.db.latest_key(key_name).await? {
            Some(record) if record.is_active => {
                decode_record(&record)?;
                Ok(record.id)
            }
            existing if generate_if_missing => {
                if existing.is_some() {
                    warn!(key_name, "No active encryption key, generating a new version");
                }
                Ok(self.rotate().await?.key_id)
            }
            Some(_) => Err(CipherError::KeyInactive(key_name.to_string())),
            None => Err(CipherError::KeyNotFound(key_name.to_string())),
        }
    }

    /// Generate a new key version and retire the previous one.
    ///
    /// Existing ciphertext stays decryptable under its recorded key id.
    pub async fn rotate(&self) -> Result<RotatedKey, CipherError> {
        let key_name = self.cipher.key_name().to_string();
        let record = self
            .db
            .insert_key_version(&key_name, &generate_key_material())
            .await?;
        self.cipher.clear_cache();

        info!(key_name = %key_name, key_id = record.id, version = record.version, "Encryption key rotated");
        Ok(RotatedKey {
            key_id: record.id,
            key_name,
            version: record.version,
        })
    }
}

fn generate_key_material() -> String {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}
