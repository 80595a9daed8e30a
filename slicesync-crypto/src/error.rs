//! Error types for value sealing.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to seal value: {0}")]
    Seal(String),

    /// The stored text is not a sealed frame at all.
    #[error("malformed sealed value: {0}")]
    Malformed(String),

    /// Wrong secret, or the frame was altered after sealing.
    #[error("sealed value failed authentication")]
    Authentication,

    /// A stored secret could not be decoded.
    #[error("invalid realm secret: {0}")]
    InvalidSecret(String),

    #[error("realm secret must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}
