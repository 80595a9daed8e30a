//! Configuration fingerprints.
//!
//! A fingerprint is the SHA-256 of a canonical JSON rendering of the fields
//! that shape what is written to the store: both defaults, the expiration
//! offset and the encryption flag. The key, schema, reducers, selectors and
//! events are deliberately left out; they can change freely without making
//! stored data unreadable.
//!
//! `serde_json` objects are key-sorted maps, so converting defaults through
//! [`serde_json::Value`] gives the same bytes regardless of the field order
//! a type's `Serialize` impl (or a `HashMap`) happens to produce.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use slicesync_types::ExpireOffset;

#[derive(Serialize)]
struct Structural {
    default_client: Value,
    default_server: Option<Value>,
    expire: Option<String>,
    encrypt: bool,
}

/// Computes the fingerprint of a slice's structural fields.
pub fn compute<T: Serialize>(
    default_client: &T,
    default_server: Option<&T>,
    expire: Option<ExpireOffset>,
    encrypt: bool,
) -> Result<String, serde_json::Error> {
    let structural = Structural {
        default_client: serde_json::to_value(default_client)?,
        default_server: default_server.map(serde_json::to_value).transpose()?,
        expire: expire.map(|e| e.to_string()),
        encrypt,
    };
    let canonical = serde_json::to_vec(&structural)?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}
