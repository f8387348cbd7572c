//! At-rest credential sealing
//!
//! Account passwords are stored encrypted with AES-256-GCM under a single
//! process-wide key from configuration. The sealed form is
//! `base64(nonce || ciphertext)`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use thiserror::Error;

/// 96-bit GCM nonce length in bytes
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("account key must be base64 of 32 bytes")]
    InvalidKey,

    #[error("sealed payload is malformed")]
    Malformed,

    #[error("decryption failed")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,
}

/// Symmetric sealer for account credentials
#[derive(Clone)]
pub struct Sealer {
    cipher: Aes256Gcm,
}

impl Sealer {
    /// Build a sealer from the base64-encoded 32-byte key.
    pub fn from_key(key_b64: &str) -> Result<Self, CryptoError> {
        let bytes = B64.decode(key_b64).map_err(|_| CryptoError::InvalidKey)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey);
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a plaintext credential for storage.
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(B64.encode(sealed))
    }

    /// Decrypt a stored credential.
    pub fn open(&self, sealed_b64: &str) -> Result<String, CryptoError> {
        let sealed = B64.decode(sealed_b64).map_err(|_| CryptoError::Malformed)?;
        if sealed.len() <= NONCE_LEN {
            return Err(CryptoError::Malformed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}
