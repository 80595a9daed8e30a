//! Realm secrets.

use crate::error::{CryptoError, CryptoResult};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// A symmetric secret with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Creates a secret from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Encodes the secret for storage.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    /// Decodes a secret previously produced by [`SecretKey::to_base64`].
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidSecret(format!("invalid base64: {e}")))?;

        if decoded.len() != KEY_SIZE {
            let actual = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual,
            });
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generates a fresh random secret.
pub fn generate_secret() -> SecretKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    SecretKey::from_bytes(bytes)
}
