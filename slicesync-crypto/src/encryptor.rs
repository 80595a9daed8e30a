//! Abstract encryption capability.
//!
//! The sync engine depends on `Arc<dyn SecretCipher>`: it hands over the
//! realm secret and the plaintext bytes and gets back an opaque string fit
//! for a text key-value store. [`ChaChaCipher`] is the stock implementation.

use crate::frame::SealedValue;
use crate::error::CryptoResult;
use crate::key::SecretKey;

/// Seals and opens slice values under a realm secret.
pub trait SecretCipher: Send + Sync {
    /// Encrypts `plaintext`, returning a storable string.
    fn seal(&self, secret: &SecretKey, plaintext: &[u8]) -> CryptoResult<String>;

    /// Reverses [`SecretCipher::seal`]. Must fail when `secret` differs from
    /// the sealing secret or `sealed` was modified.
    fn open(&self, secret: &SecretKey, sealed: &str) -> CryptoResult<Vec<u8>>;
}

/// ChaCha20-Poly1305 with base64 framing, see [`SealedValue`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaChaCipher;

impl SecretCipher for ChaChaCipher {
    fn seal(&self, secret: &SecretKey, plaintext: &[u8]) -> CryptoResult<String> {
        Ok(SealedValue::seal(secret, plaintext)?.encode())
    }

    fn open(&self, secret: &SecretKey, sealed: &str) -> CryptoResult<Vec<u8>> {
        SealedValue::decode(sealed)?.open(secret)
    }
}
