//! Realms: the services shared by every context of one application.
//!
//! A realm bundles the persistent store, the broadcast bus, the clock and
//! the cipher. Contexts that share a realm converge on the same slice
//! values; separate realms never see each other.
//!
//! A pre-rendering context is modelled as a realm without a store. It can
//! mount server-rendered slices only, and shows their server default.

use crate::bus::{BroadcastBus, DEFAULT_BUS_CAPACITY};
use crate::config::{SliceConfig, SliceValue};
use crate::controller::SliceHandle;
use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use slicesync_crypto::{ChaChaCipher, SecretCipher};
use slicesync_storage::KeyValueStore;
use slicesync_types::{Clock, SystemClock};
use std::sync::Arc;

/// Tunables for a realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RealmConfig {
    /// Messages buffered per bus endpoint before the oldest are dropped.
    pub bus_capacity: usize,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl RealmConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Shared services for a set of contexts.
#[derive(Clone)]
pub struct Realm {
    store: Option<Arc<dyn KeyValueStore>>,
    bus: BroadcastBus,
    clock: Arc<dyn Clock>,
    cipher: Arc<dyn SecretCipher>,
}

impl Realm {
    /// A realm over `store` with default services.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::builder().store(store).build()
    }

    /// A realm with no persistent store.
    pub fn without_store() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RealmBuilder {
        RealmBuilder::default()
    }

    /// A pre-rendering context on the same bus, without store access.
    pub fn server(&self) -> Self {
        Self {
            store: None,
            ..self.clone()
        }
    }

    /// Mounts a slice in this context.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount<T: SliceValue>(
        &self,
        config: impl Into<Arc<SliceConfig<T>>>,
    ) -> SyncResult<SliceHandle<T>> {
        SliceHandle::mount(self, config.into())
    }

    pub fn store(&self) -> Option<&Arc<dyn KeyValueStore>> {
        self.store.as_ref()
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn cipher(&self) -> &Arc<dyn SecretCipher> {
        &self.cipher
    }

    /// Closes the bus. Mounted slices stop converging but keep their value.
    pub fn close(&self) {
        self.bus.close();
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("store", &self.store.is_some())
            .field("bus", &self.bus)
            .finish()
    }
}

/// Builder for [`Realm`].
#[derive(Default)]
pub struct RealmBuilder {
    config: RealmConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    bus: Option<BroadcastBus>,
    clock: Option<Arc<dyn Clock>>,
    cipher: Option<Arc<dyn SecretCipher>>,
}

impl RealmBuilder {
    pub fn config(mut self, config: RealmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Joins an existing bus instead of opening a new one.
    pub fn bus(mut self, bus: BroadcastBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn SecretCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn build(self) -> Realm {
        let capacity = self.config.bus_capacity;
        Realm {
            store: self.store,
            bus: self.bus.unwrap_or_else(|| BroadcastBus::open(capacity)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            cipher: self.cipher.unwrap_or_else(|| Arc::new(ChaChaCipher)),
        }
    }
}
