//! Error types for the sync layer.

use slicesync_crypto::CryptoError;
use slicesync_storage::StorageError;
use slicesync_types::ExecutionMode;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised while defining a slice.
///
/// Every variant names the slice it belongs to (or `<unknown>` when the key
/// itself is missing) and the offending field.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is absent.
    #[error("slice `{key}`: `{field}` is required")]
    MissingField { key: String, field: &'static str },

    /// The slice key is empty or uses a reserved prefix.
    #[error("slice `{key}`: invalid `key`: {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: slicesync_types::Error,
    },

    /// The expiration offset does not match `<D>d-<H>h-<M>m-<S>s`.
    #[error("slice `{key}`: invalid `expire`: {source}")]
    InvalidExpire {
        key: String,
        #[source]
        source: slicesync_types::Error,
    },

    /// A field holds a value of the wrong type.
    #[error("slice `{key}`: `{field}` {reason}")]
    InvalidField {
        key: String,
        field: &'static str,
        reason: String,
    },

    /// `defaultServer` was given without server rendering, or vice versa.
    #[error("slice `{key}`: `defaultServer` and `ssr` must be set together")]
    ServerRenderingMismatch { key: String },

    /// A reducer or selector was registered with an empty name.
    #[error("slice `{key}`: `{field}` contains an empty name")]
    EmptyName { key: String, field: &'static str },

    /// A reducer or selector name was registered twice.
    #[error("slice `{key}`: `{field}` name `{name}` is defined twice")]
    DuplicateName {
        key: String,
        field: &'static str,
        name: String,
    },

    /// A declarative descriptor carried fields the engine does not know.
    #[error("slice `{key}`: not defined key `{}` in config", fields.join(", "))]
    UnknownFields { key: String, fields: Vec<String> },

    /// The schema rejected one of the configured defaults.
    #[error("slice `{key}`: {mode:?} default rejected by schema: {reason}")]
    DefaultRejected {
        key: String,
        mode: ExecutionMode,
        reason: String,
    },

    /// A default value could not be serialized.
    #[error("slice `{key}`: default value is not serializable: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur at mount time or while writing a slice.
///
/// Stale or corrupt stored data never surfaces here; it is repaired in place.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid slice definition.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A slice that needs the persistent store was used where none exists.
    #[error("slice `{key}`: persistent store is unavailable; enable `ssr` to mount without it")]
    StoreUnavailable { key: String },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encryption error while writing a value.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No reducer with this name is configured.
    #[error("slice `{key}`: unknown reducer `{name}`")]
    UnknownReducer { key: String, name: String },

    /// No selector with this name is configured.
    #[error("slice `{key}`: unknown selector `{name}`")]
    UnknownSelector { key: String, name: String },

    /// Mounting needs a tokio runtime to drive the slice's background tasks.
    #[error("slice `{key}`: mount must happen inside a tokio runtime")]
    RuntimeUnavailable { key: String },

    /// The realm's broadcast bus has been closed.
    #[error("broadcast bus closed")]
    BusClosed,
}
