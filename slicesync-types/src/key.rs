//! Slice identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Prefixes reserved for the engine's internal key space.
///
/// Physical storage keys are built from these, so a user key starting with
/// either one could collide with bookkeeping entries.
pub const RESERVED_PREFIXES: [&str; 2] = ["slices-", "slice-"];

/// The identity of a slice.
///
/// Non-empty and never starting with one of [`RESERVED_PREFIXES`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SliceKey(String);

impl SliceKey {
    /// Validates and wraps a slice key.
    pub fn parse(key: impl Into<String>) -> Result<Self, Error> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if let Some(prefix) = RESERVED_PREFIXES.iter().find(|p| key.starts_with(**p)) {
            return Err(Error::ReservedPrefix { key, prefix });
        }
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SliceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SliceKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SliceKey> for String {
    fn from(key: SliceKey) -> Self {
        key.0
    }
}

impl AsRef<str> for SliceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
