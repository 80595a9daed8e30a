//! Core type definitions for SliceSync.
//!
//! This crate defines the small vocabulary shared by every other layer of
//! the engine:
//! - Slice identities (`SliceKey`) with their reserved-prefix rules
//! - Expiration offsets in the `<D>d-<H>h-<M>m-<S>s` format
//! - The execution mode a slice is mounted in
//! - Wall clocks measured in milliseconds since the Unix epoch

mod clock;
mod expire;
mod key;

pub use clock::{Clock, ManualClock, SystemClock, now_millis};
pub use expire::ExpireOffset;
pub use key::{RESERVED_PREFIXES, SliceKey};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when constructing core types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("slice key is an empty string")]
    EmptyKey,

    #[error("slice key `{key}` cannot start with `{prefix}`")]
    ReservedPrefix { key: String, prefix: &'static str },

    #[error("invalid expire format `{0}`, expected `<D>d-<H>h-<M>m-<S>s`")]
    InvalidExpire(String),
}

/// Where a slice instance is being mounted.
///
/// `Server` corresponds to a pre-rendering pass without access to the
/// persistent store; `Client` is a live context that owns store access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Server,
    Client,
}
