// Route password encryption.
// Uses AES-256-GCM; ciphertexts are base64 of a 12-byte nonce followed by the sealed bytes.
// The key is a base64 32-byte value read from the environment.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Secret handling errors
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("value is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("ciphertext is too short")]
    Truncated,

    /// Wrong key or tampered ciphertext
    #[error("decryption failed")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,

    #[error("decrypted value is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encrypts and decrypts route passwords
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Create from a base64-encoded 32-byte key
    pub fn from_base64_key(key: &str) -> Result<Self, SecretError> {
        let key_bytes = BASE64.decode(key.trim())?;
        if key_bytes.len() != KEY_SIZE {
            return Err(SecretError::InvalidKey(format!(
                "key must be {} bytes, got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Create from the named environment variable
    ///
    /// Returns `None` when the variable is unset or empty, meaning passwords are plaintext.
    pub fn from_env(var: &str) -> Result<Option<Self>, SecretError> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Self::from_base64_key(&key).map(Some),
            _ => Ok(None),
        }
    }

    /// Generate a random key, base64-encoded
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        BASE64.encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| SecretError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + sealed.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&sealed);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, SecretError> {
        let combined = BASE64.decode(encoded.trim())?;
        if combined.len() <= NONCE_SIZE {
            return Err(SecretError::Truncated);
        }

        let (nonce, sealed) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| SecretError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}
