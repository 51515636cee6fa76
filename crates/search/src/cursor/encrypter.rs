//! Cursor encryption using AES-256-GCM.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{
    Engine,
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
};
use rand::RngCore;

use crate::error::{ConfigurationError, CursorError, CursorResult, EngineError, EngineResult};

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
pub const KEY_SIZE: usize = 32;

/// Encrypts cursor payloads into URL-safe tokens and back.
///
/// Each token is the URL-safe base64 (no padding) of a fresh random nonce
/// followed by the ciphertext and its authentication tag. A token that was not
/// produced with the same key fails to decrypt with [`CursorError::InvalidLink`].
#[derive(Clone)]
pub struct CursorEncrypter {
    cipher: Aes256Gcm,
}

impl CursorEncrypter {
    /// Creates an encrypter from raw key bytes.
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Creates an encrypter from a hex or base64 key string.
    pub fn from_key_str(key_str: &str) -> Result<Self, ConfigurationError> {
        Ok(Self::new(&parse_key(key_str)?))
    }

    /// Creates an encrypter with a random key.
    pub fn generate() -> Self {
        Self::new(&generate_key())
    }

    /// Encrypts a payload.
    pub fn encrypt(&self, plaintext: &str) -> EngineResult<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EngineError::Internal {
                message: format!("cursor encryption failed: {e}"),
            })?;

        let mut token = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Decrypts a token produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, token: &str) -> CursorResult<String> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|e| {
            tracing::debug!(error = %e, "Cursor is not valid base64");
            CursorError::InvalidLink
        })?;
        if bytes.len() <= NONCE_SIZE {
            tracing::debug!(len = bytes.len(), "Cursor too short");
            return Err(CursorError::InvalidLink);
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                tracing::debug!("Cursor failed authentication");
                CursorError::InvalidLink
            })?;

        String::from_utf8(plaintext).map_err(|_| CursorError::InvalidLink)
    }
}

impl std::fmt::Debug for CursorEncrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorEncrypter").finish_non_exhaustive()
    }
}

/// Generates a random key.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Parse a key from a hex or base64 string
fn parse_key(key_str: &str) -> Result<[u8; KEY_SIZE], ConfigurationError> {
    let key_str = key_str.trim();
    let invalid = |message: String| ConfigurationError::InvalidCursorKey { message };

    // Try hex first
    if key_str.len() == KEY_SIZE * 2 {
        if let Ok(bytes) = hex::decode(key_str) {
            return to_key(&bytes).ok_or_else(|| invalid("wrong key length".to_string()));
        }
    }

    let bytes = BASE64
        .decode(key_str)
        .or_else(|_| URL_SAFE_NO_PAD.decode(key_str))
        .map_err(|e| invalid(format!("not hex or base64: {e}")))?;

    to_key(&bytes).ok_or_else(|| {
        invalid(format!(
            "key must be {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        ))
    })
}

fn to_key(bytes: &[u8]) -> Option<[u8; KEY_SIZE]> {
    <[u8; KEY_SIZE]>::try_from(bytes).ok()
}
