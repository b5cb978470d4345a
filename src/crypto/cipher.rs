//! Authenticated symmetric encryption of access tokens.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::crypto::keys::KeySource;
use crate::observability::metrics;
use crate::storage::StorageError;

/// AES-256-GCM with a 128-bit nonce and 128-bit tag.
type TokenCipher = AesGcm<Aes256, U16>;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption key not found: {0}")]
    KeyNotFound(String),

    #[error("no active encryption key named '{0}'")]
    KeyInactive(String),

    /// Tampered ciphertext or wrong key.
    #[error("ciphertext failed authentication")]
    AuthenticationFailure,

    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),

    #[error("key {0} has invalid material")]
    InvalidKey(i64),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("key lookup failed: {0}")]
    Storage(#[from] StorageError),
}

/// Raw 256-bit key plus the id of the row it came from.
#[derive(Clone)]
pub struct KeyMaterial {
    pub id: i64,
    bytes: [u8; KEY_LEN],
}

impl KeyMaterial {
    pub fn new(id: i64, bytes: &[u8]) -> Result<Self, CipherError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CipherError::InvalidKey(id))?;
        Ok(Self { id, bytes })
    }

    fn cipher(&self) -> Result<TokenCipher, CipherError> {
        TokenCipher::new_from_slice(&self.bytes).map_err(|_| CipherError::InvalidKey(self.id))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

/// Output of `encrypt`: opaque bytes and the key that sealed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub key_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Name(String),
    Id(i64),
}

/// Encrypts under the active key of one logical name; decrypts under any key id.
///
/// Constructed once per process and shared by reference. The key cache is
/// read-mostly and is dropped wholesale by `clear_cache` on rotation.
pub struct SecretCipher {
    source: Arc<dyn KeySource>,
    key_name: String,
    cache: DashMap<CacheKey, Arc<KeyMaterial>>,
}

impl SecretCipher {
    pub fn new(source: Arc<dyn KeySource>, key_name: impl Into<String>) -> Self {
        Self {
            source,
            key_name: key_name.into(),
            cache: DashMap::new(),
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Seal `plaintext` under the currently active key.
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, CipherError> {
        let key = self.active_key().await?;
        let ciphertext = seal(&key, plaintext)?;
        Ok(Sealed {
            ciphertext,
            key_id: key.id,
        })
    }

    /// Open bytes produced by `encrypt` under the key with `key_id`.
    pub async fn decrypt(&self, sealed: &[u8], key_id: i64) -> Result<Vec<u8>, CipherError> {
        let key = self.key_by_id(key_id).await?;
        open(&key, sealed)
    }

    pub async fn encrypt_str(&self, plaintext: &str) -> Result<Sealed, CipherError> {
        self.encrypt(plaintext.as_bytes()).await
    }

    pub async fn decrypt_to_string(&self, sealed: &[u8], key_id: i64) -> Result<String, CipherError> {
        let plaintext = self.decrypt(sealed, key_id).await?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Malformed("plaintext is not UTF-8"))
    }

    /// Forget all cached key material. Called after key rotation.
    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!(key_name = %self.key_name, "Cipher key cache cleared");
    }

    async fn active_key(&self) -> Result<Arc<KeyMaterial>, CipherError> {
        let cache_key = CacheKey::Name(self.key_name.clone());
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit.value().clone());
        }

        metrics::record_key_cache_miss("name");
        let key = Arc::new(self.source.active_key(&self.key_name).await?);
        self.cache.insert(CacheKey::Id(key.id), key.clone());
        self.cache.insert(cache_key, key.clone());
        Ok(key)
    }

    async fn key_by_id(&self, id: i64) -> Result<Arc<KeyMaterial>, CipherError> {
        if let Some(hit) = self.cache.get(&CacheKey::Id(id)) {
            return Ok(hit.value().clone());
        }

        metrics::record_key_cache_miss("id");
        let key = Arc::new(self.source.key_by_id(id).await?);
        self.cache.insert(CacheKey::Id(id), key.clone());
        Ok(key)
    }
}

fn seal(key: &KeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = key.cipher()?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut buffer)
        .map_err(|_| CipherError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&tag);
    sealed.extend_from_slice(&buffer);
    Ok(sealed)
}

fn open(key: &KeyMaterial, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::Malformed("shorter than nonce and tag"));
    }
    let cipher = key.cipher()?;

    let (nonce, rest) = sealed.split_at(NONCE_LEN);
    let (tag, body) = rest.split_at(TAG_LEN);

    let mut buffer = body.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            &mut buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CipherError::AuthenticationFailure)?;
    Ok(buffer)
}
