//! AES-256-GCM encryption for credential records.
//!
//! Each payload is encrypted with a fresh random nonce. The nonce is prepended
//! to the ciphertext and the pair is base64-encoded into a single string, so a
//! stored value is self-contained.
//! The key must be 32 bytes (256 bits) and is handed to [`Cipher`] explicitly.

use crate::error::{OAuthError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Validates that a key is exactly 32 bytes when base64 decoded.
///
/// # Returns
/// * `Ok([u8; 32])` - Decoded key bytes
/// * `Err(OAuthError::Config)` - If key is invalid length or invalid base64
pub fn validate_key(key_base64: &str) -> Result<[u8; KEY_SIZE]> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .map_err(|e| OAuthError::Config(format!("Failed to decode base64 encryption key: {}", e)))?;

    <[u8; KEY_SIZE]>::try_from(key_bytes.as_slice()).map_err(|_| {
        OAuthError::Config(format!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ))
    })
}

/// Generates a random key, base64-encoded.
///
/// Used when no key is configured; anything encrypted with it is lost on restart.
pub fn generate_key() -> String {
    BASE64.encode(Aes256Gcm::generate_key(&mut OsRng))
}

/// Symmetric cipher over opaque strings.
///
/// Knows nothing about what it encrypts. Decryption fails with
/// [`OAuthError::Decryption`] on wrong key, truncation or tampering rather
/// than returning garbage.
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Builds a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
        validate_key(key_base64).map(Self::new)
    }

    /// Encrypts `plaintext` and returns `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        // Never reuse a nonce under the same key
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| OAuthError::Storage(format!("Encryption failed: {}", e)))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(payload))
    }

    /// Decrypts a value produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let payload = BASE64
            .decode(encoded)
            .map_err(|e| OAuthError::Decryption(format!("Failed to decode ciphertext: {}", e)))?;

        if payload.len() <= NONCE_SIZE {
            return Err(OAuthError::Decryption(format!(
                "Ciphertext too short: {} bytes",
                payload.len()
            )));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| {
            OAuthError::Decryption("wrong key or corrupted data".to_string())
        })?;

        String::from_utf8(plaintext)
            .map_err(|_| OAuthError::Decryption("Decrypted data is not valid UTF-8".to_string()))
    }
}
