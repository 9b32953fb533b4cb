//! Secret vault for configuration values
//!
//! Password-like parameters (`password`, `secrettext`, `secretmap` values,
//! `secretfile`) are stored wrapped as AES-256-GCM blobs and unwrapped on read
//! for callers holding the reveal capability, and for the inventory.
//!
//! Wrapped format: `$ADCM_VAULT;1.0;AES256\n<base64(nonce || ciphertext || tag)>`

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Header marking a wrapped value
pub const VAULT_HEADER: &str = "$ADCM_VAULT;1.0;AES256\n";

const NONCE_LEN: usize = 12;

/// Error types for vault operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Base64 decode error: {0}")]
    Base64Error(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

impl From<CryptoError> for crate::AdcmError {
    fn from(value: CryptoError) -> Self {
        crate::AdcmError::ConfigValue(value.to_string())
    }
}

/// AES-256-GCM vault keyed by the deployment secret
pub struct SecretVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVault").finish_non_exhaustive()
    }
}

impl SecretVault {
    /// Create a vault from a raw 32-byte key
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(key.into());
        Self { cipher }
    }

    /// Derive the key from an arbitrary secret string (sha256)
    pub fn from_secret(secret: &str) -> CryptoResult<Self> {
        if secret.is_empty() {
            return Err(CryptoError::InvalidKey("secret key is empty".to_string()));
        }
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(Self::new(&key))
    }

    /// Create a vault from a base64-encoded 32-byte key
    pub fn from_base64_key(key: &str) -> CryptoResult<Self> {
        let key_bytes = BASE64
            .decode(key)
            .map_err(|e| CryptoError::Base64Error(e.to_string()))?;

        let key_array: [u8; 32] = key_bytes.try_into().map_err(|bytes: Vec<u8>| {
            CryptoError::InvalidKey(format!("Key must be 32 bytes, got {}", bytes.len()))
        })?;

        Ok(Self::new(&key_array))
    }

    /// Generate a new random 256-bit key
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// True when the value already carries the vault header
    pub fn is_wrapped(value: &str) -> bool {
        value.starts_with(VAULT_HEADER)
    }

    /// Wrap a plain value. Already wrapped values are returned unchanged.
    pub fn seal(&self, plaintext: &str) -> CryptoResult<String> {
        if Self::is_wrapped(plaintext) {
            return Ok(plaintext.to_string());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", VAULT_HEADER, BASE64.encode(combined)))
    }

    /// Unwrap a value. Values without the vault header are returned as is.
    pub fn reveal(&self, wrapped: &str) -> CryptoResult<String> {
        let Some(body) = wrapped.strip_prefix(VAULT_HEADER) else {
            return Ok(wrapped.to_string());
        };

        let combined = BASE64
            .decode(body.trim())
            .map_err(|e| CryptoError::Base64Error(e.to_string()))?;

        if combined.len() < NONCE_LEN {
            return Err(CryptoError::InvalidData("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
    }
}
