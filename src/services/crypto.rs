//! Encryption at rest using AES-256-GCM
//!
//! Sealed blobs are laid out as `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! A fresh random nonce is drawn for every seal, so the nonce never needs
//! separate storage.

use std::fmt;

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm,
};
use thiserror::Error;

/// AES-256 key length in bytes
pub const KEY_SIZE: usize = 32;
/// GCM nonce length in bytes
pub const NONCE_SIZE: usize = 12;
/// GCM authentication tag length in bytes
pub const TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be exactly {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("encryption failed")]
    Encrypt,

    /// Ciphertext too short or tag mismatch
    #[error("decryption failed")]
    Decrypt,

    #[error("no encryption key configured")]
    MissingKey,
}

/// AEAD cipher bound to the configured at-rest key
#[derive(Clone)]
pub struct AtRestCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for AtRestCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtRestCipher").finish_non_exhaustive()
    }
}

impl AtRestCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext`, returning `nonce || ct || tag`
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Split the nonce prefix and decrypt, verifying the tag
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::Decrypt);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = GenericArray::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}
