//! Envelope encryption for long-lived provider secrets.
//!
//! # Data Flow
//! ```text
//! encrypt(plaintext)
//!     → key cache (by logical name) → KeySource::active_key on miss
//!     → AES-256-GCM, fresh 128-bit nonce
//!     → nonce || tag || ciphertext, key id
//!
//! decrypt(sealed, key id)
//!     → key cache (by id) → KeySource::key_by_id on miss
//!     → tag verified before any plaintext is returned
//! ```
//!
//! # Security Constraints
//! - Key material and plaintext are never logged
//! - Rotated keys stay readable by id; only encryption moves to the new key
//! - Authentication failures are errors, never empty or partial plaintext

pub mod cipher;
pub mod keys;

pub use cipher::{CipherError, KeyMaterial, Sealed, SecretCipher, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use keys::{KeyManager, KeySource, RotatedKey};
