//! Symmetric authenticated encryption for third-party credentials.
//!
//! # Contract
//! - One process-wide 32-byte key, loaded once at init from `ENCRYPTION_KEY`
//!   (URL-safe base64). A missing or malformed key is fatal at startup; the
//!   process refuses to begin.
//! - Wire format: `nonce (12 bytes) || AES-256-GCM ciphertext+tag`. The tag
//!   gives integrity; any bit-flip fails decryption.
//! - Rotation re-wraps: decrypt under the old store, encrypt under the new.
//! - `Debug` output never contains key material.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Secret-store failures. None of these carry key or plaintext material.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("encryption key is not valid url-safe base64")]
    KeyNotBase64,
    #[error("encryption key must decode to {KEY_LEN} bytes, got {got}")]
    KeyWrongLength { got: usize },
    #[error("ciphertext too short to carry a nonce")]
    CiphertextTooShort,
    #[error("decryption failed (wrong key or tampered ciphertext)")]
    DecryptFailed,
    #[error("encryption failed")]
    EncryptFailed,
}

/// Process-wide credential cipher.
#[derive(Clone)]
pub struct SecretStore {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").field("key", &"<REDACTED>").finish()
    }
}

impl SecretStore {
    /// Build from the URL-safe base64 key string (padded or unpadded).
    pub fn from_base64_key(key_b64: &str) -> Result<Self, SecretError> {
        let trimmed = key_b64.trim();
        let bytes = URL_SAFE
            .decode(trimmed)
            .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
            .map_err(|_| SecretError::KeyNotBase64)?;
        if bytes.len() != KEY_LEN {
            return Err(SecretError::KeyWrongLength { got: bytes.len() });
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt plaintext; output is `nonce || ciphertext+tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SecretError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ct = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| SecretError::EncryptFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext+tag` blob.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, SecretError> {
        if blob.len() < NONCE_LEN {
            return Err(SecretError::CiphertextTooShort);
        }
        let (nonce_bytes, ct) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ct)
            .map_err(|_| SecretError::DecryptFailed)
    }

    /// Re-wrap a blob encrypted under `self` so it is encrypted under `next`.
    pub fn rotate_to(&self, next: &SecretStore, blob: &[u8]) -> Result<Vec<u8>, SecretError> {
        let plaintext = self.decrypt(blob)?;
        next.encrypt(&plaintext)
    }
}
