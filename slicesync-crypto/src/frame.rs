//! The stored form of a sealed slice value.
//!
//! A frame is `nonce ‖ ciphertext ‖ tag`, base64 encoded so it fits a text
//! store. Every seal draws a fresh nonce, so sealing the same value twice
//! gives two different frames.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SecretKey;
use base64::{Engine, engine::general_purpose::STANDARD};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;

/// Nonce length of ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag length.
pub const TAG_SIZE: usize = 16;

/// A value sealed under a realm secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedValue {
    nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the tag appended.
    body: Vec<u8>,
}

impl SealedValue {
    /// Seals `plaintext` under `secret`.
    pub fn seal(secret: &SecretKey, plaintext: &[u8]) -> CryptoResult<Self> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let body = aead(secret)
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Seal(e.to_string()))?;
        Ok(Self { nonce, body })
    }

    /// Recovers the plaintext. Fails with [`CryptoError::Authentication`]
    /// when `secret` is not the sealing secret or the frame was altered.
    pub fn open(&self, secret: &SecretKey) -> CryptoResult<Vec<u8>> {
        aead(secret)
            .decrypt(Nonce::from_slice(&self.nonce), self.body.as_slice())
            .map_err(|_| CryptoError::Authentication)
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Length of the plaintext this frame carries.
    pub fn plaintext_len(&self) -> usize {
        self.body.len() - TAG_SIZE
    }

    pub fn encode(&self) -> String {
        let mut frame = Vec::with_capacity(NONCE_SIZE + self.body.len());
        frame.extend_from_slice(&self.nonce);
        frame.extend_from_slice(&self.body);
        STANDARD.encode(frame)
    }

    pub fn decode(encoded: &str) -> CryptoResult<Self> {
        let frame = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Malformed(format!("not base64: {e}")))?;

        if frame.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Malformed(format!(
                "{} bytes is shorter than nonce and tag",
                frame.len()
            )));
        }

        let (nonce, body) = frame.split_at(NONCE_SIZE);
        let mut fixed = [0u8; NONCE_SIZE];
        fixed.copy_from_slice(nonce);
        Ok(Self {
            nonce: fixed,
            body: body.to_vec(),
        })
    }

    #[cfg(test)]
    fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }
}

fn aead(secret: &SecretKey) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(secret.as_bytes().into())
}
