//! Physical key naming.
//!
//! A slice `k` owns three entries:
//!
//! | entry       | physical key             |
//! |-------------|--------------------------|
//! | value       | `slice-k`                |
//! | fingerprint | `slices-checksum-k`      |
//! | expiration  | `slices-expire-k`        |
//!
//! plus the realm-wide [`SECRET_KEY`]. Slice keys may not start with
//! `slice-` or `slices-`, and a value key always has `-` as its sixth
//! character while bookkeeping keys have `s`, so no two distinct entries
//! can share a physical key.

use slicesync_types::SliceKey;

/// Physical key holding the realm secret used by encrypted slices.
pub const SECRET_KEY: &str = "slices-secret";

const VALUE_PREFIX: &str = "slice-";
const CHECKSUM_PREFIX: &str = "slices-checksum-";
const EXPIRE_PREFIX: &str = "slices-expire-";

/// The physical keys owned by one slice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKeys {
    value: String,
    checksum: String,
    expire: String,
}

impl StorageKeys {
    /// Derives the physical keys for `key`.
    #[must_use]
    pub fn for_slice(key: &SliceKey) -> Self {
        Self {
            value: format!("{VALUE_PREFIX}{key}"),
            checksum: format!("{CHECKSUM_PREFIX}{key}"),
            expire: format!("{EXPIRE_PREFIX}{key}"),
        }
    }

    /// Key of the encoded slice value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Key of the configuration fingerprint.
    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Key of the absolute expiration timestamp.
    #[must_use]
    pub fn expire(&self) -> &str {
        &self.expire
    }
}
