//! Value encoding for the store.
//!
//! Plain slices are stored as JSON text. Encrypted slices seal the same JSON
//! bytes with the realm's [`SecretCipher`] and store its textual output.

use crate::error::SyncError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use slicesync_crypto::{CryptoError, SecretCipher, SecretKey};
use thiserror::Error;

/// Why a value could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cipher: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Json(e) => SyncError::Serialization(e),
            CodecError::Crypto(e) => SyncError::Crypto(e),
        }
    }
}

/// How a slice's value is written to the store.
#[derive(Clone, Copy)]
pub enum Codec<'a> {
    Plain,
    Sealed {
        cipher: &'a dyn SecretCipher,
        secret: &'a SecretKey,
    },
}

impl Codec<'_> {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String, CodecError> {
        match self {
            Self::Plain => Ok(serde_json::to_string(value)?),
            Self::Sealed { cipher, secret } => {
                let json = serde_json::to_vec(value)?;
                Ok(cipher.seal(secret, &json)?)
            }
        }
    }

    /// Fails on malformed text, a wrong secret or tampered ciphertext, and
    /// on JSON that does not fit `T`.
    pub fn decode<T: DeserializeOwned>(&self, stored: &str) -> Result<T, CodecError> {
        match self {
            Self::Plain => Ok(serde_json::from_str(stored)?),
            Self::Sealed { cipher, secret } => {
                let json = cipher.open(secret, stored)?;
                Ok(serde_json::from_slice(&json)?)
            }
        }
    }
}
