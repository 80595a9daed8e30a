//! Typed access to one slice's stored entries.
//!
//! The accessor owns the rules for what counts as usable stored data. A read
//! never fails because of what is in the store: drifted, corrupt or rejected
//! values are removed and reported as [`Staleness`] alongside the client
//! default. Only backend and encryption failures surface as errors.

use crate::codec::Codec;
use crate::config::{SliceConfig, SliceValue};
use crate::error::SyncResult;
use crate::validator::{self, Validation};
use slicesync_crypto::{SecretCipher, SecretKey, generate_secret};
use slicesync_storage::{KeyValueStore, SECRET_KEY, StorageKeys};
use slicesync_types::Clock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a stored value was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    /// The value was written under a different structural configuration.
    Drift,
    /// The value could not be decoded.
    Corrupt(String),
    /// The value decoded but the schema rejected it.
    Rejected(String),
}

/// The result of reading a slice from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome<T> {
    pub value: T,
    /// Set when the stored value was discarded and `value` is the default.
    pub stale: Option<Staleness>,
}

impl<T> ReadOutcome<T> {
    fn fresh(value: T) -> Self {
        Self { value, stale: None }
    }

    fn stale(value: T, reason: Staleness) -> Self {
        Self {
            value,
            stale: Some(reason),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale.is_some()
    }
}

/// Reads and writes the entries of one slice.
pub struct StoreAccessor<T: SliceValue> {
    config: Arc<SliceConfig<T>>,
    keys: StorageKeys,
    store: Arc<dyn KeyValueStore>,
    cipher: Arc<dyn SecretCipher>,
    clock: Arc<dyn Clock>,
}

impl<T: SliceValue> StoreAccessor<T> {
    pub fn new(
        config: Arc<SliceConfig<T>>,
        store: Arc<dyn KeyValueStore>,
        cipher: Arc<dyn SecretCipher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = StorageKeys::for_slice(config.key());
        Self {
            config,
            keys,
            store,
            cipher,
            clock,
        }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Seeds every entry the slice needs that is not yet present.
    ///
    /// Existing entries are never overwritten.
    pub fn ensure_required_keys(&self) -> SyncResult<()> {
        if self.config.encrypt() {
            self.secret()?;
        }

        if !self.store.contains(self.keys.value())? {
            let encoded = self.encode(self.config.default_client())?;
            self.store.set(self.keys.value(), &encoded)?;
            debug!(key = %self.config.key(), "seeded value entry with client default");
        }

        if !self.store.contains(self.keys.checksum())? {
            self.write_fingerprint(self.config.fingerprint())?;
        }

        if self.config.expire().is_some() && !self.store.contains(self.keys.expire())? {
            self.reset_expiration()?;
        }

        Ok(())
    }

    /// Reads the current value, repairing the store when it is stale.
    pub fn read_value(&self) -> SyncResult<ReadOutcome<T>> {
        self.ensure_required_keys()?;
        let key = self.config.key();
        let default = self.config.default_client().clone();

        if self.read_fingerprint()?.as_deref() != Some(self.config.fingerprint()) {
            info!(%key, "configuration changed since the value was stored; resetting");
            self.write_fingerprint(self.config.fingerprint())?;
            self.remove_value()?;
            return Ok(ReadOutcome::stale(default, Staleness::Drift));
        }

        let Some(stored) = self.store.get(self.keys.value())? else {
            return Ok(ReadOutcome::fresh(default));
        };

        let value = match self.decode(&stored) {
            Ok(value) => value,
            Err(reason) => {
                warn!(%key, %reason, "stored value is unreadable; falling back to default");
                self.remove_value()?;
                return Ok(ReadOutcome::stale(default, Staleness::Corrupt(reason)));
            }
        };

        match validator::validate(&value, self.config.schema()) {
            Validation::Ok => Ok(ReadOutcome::fresh(value)),
            Validation::Rejected(reason) => {
                warn!(%key, %reason, "stored value rejected by schema; falling back to default");
                self.remove_value()?;
                Ok(ReadOutcome::stale(default, Staleness::Rejected(reason)))
            }
        }
    }

    /// Encodes and stores `value`. Does not notify anyone.
    pub fn write_value(&self, value: &T) -> SyncResult<()> {
        let encoded = self.encode(value)?;
        self.store.set(self.keys.value(), &encoded)?;
        if !self.store.contains(self.keys.checksum())? {
            self.write_fingerprint(self.config.fingerprint())?;
        }
        Ok(())
    }

    pub fn remove_value(&self) -> SyncResult<()> {
        self.store.remove(self.keys.value())?;
        Ok(())
    }

    pub fn read_fingerprint(&self) -> SyncResult<Option<String>> {
        Ok(self.store.get(self.keys.checksum())?)
    }

    pub fn write_fingerprint(&self, fingerprint: &str) -> SyncResult<()> {
        self.store.set(self.keys.checksum(), fingerprint)?;
        Ok(())
    }

    /// The stored expiration deadline in epoch milliseconds.
    ///
    /// An unparseable entry reads as absent.
    pub fn read_expiration(&self) -> SyncResult<Option<u64>> {
        let Some(raw) = self.store.get(self.keys.expire())? else {
            return Ok(None);
        };
        match raw.trim().parse::<u64>() {
            Ok(deadline) => Ok(Some(deadline)),
            Err(_) => {
                warn!(key = %self.config.key(), %raw, "ignoring malformed expiration entry");
                Ok(None)
            }
        }
    }

    pub fn write_expiration(&self, deadline: u64) -> SyncResult<()> {
        self.store.set(self.keys.expire(), &deadline.to_string())?;
        Ok(())
    }

    /// Moves the deadline to `now + offset` and returns it, or `None` when
    /// the slice does not expire.
    pub fn reset_expiration(&self) -> SyncResult<Option<u64>> {
        let Some(offset) = self.config.expire() else {
            return Ok(None);
        };
        let deadline = self.clock.now_millis().saturating_add(offset.as_millis());
        self.write_expiration(deadline)?;
        Ok(Some(deadline))
    }

    /// The realm secret, provisioned on first use.
    ///
    /// A malformed secret entry is replaced; values sealed under it were
    /// unreadable anyway.
    fn secret(&self) -> SyncResult<SecretKey> {
        if let Some(encoded) = self.store.get(SECRET_KEY)? {
            match SecretKey::from_base64(&encoded) {
                Ok(secret) => return Ok(secret),
                Err(e) => warn!(error = %e, "realm secret is malformed; provisioning a new one"),
            }
        }
        let secret = generate_secret();
        self.store.set(SECRET_KEY, &secret.to_base64())?;
        info!("provisioned realm secret");
        Ok(secret)
    }

    fn encode(&self, value: &T) -> SyncResult<String> {
        if !self.config.encrypt() {
            return Ok(Codec::Plain.encode(value)?);
        }
        let secret = self.secret()?;
        let codec = Codec::Sealed {
            cipher: self.cipher.as_ref(),
            secret: &secret,
        };
        Ok(codec.encode(value)?)
    }

    fn decode(&self, stored: &str) -> Result<T, String> {
        if !self.config.encrypt() {
            return Codec::Plain.decode(stored).map_err(|e| e.to_string());
        }
        let secret = self.secret().map_err(|e| e.to_string())?;
        let codec = Codec::Sealed {
            cipher: self.cipher.as_ref(),
            secret: &secret,
        };
        codec.decode(stored).map_err(|e| e.to_string())
    }
}
