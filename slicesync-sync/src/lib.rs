//! Slice synchronization engine for SliceSync.
//!
//! A *slice* is a named, typed piece of application state that lives in a
//! persistent key-value store shared by several concurrently running
//! contexts (think browser tabs over one local storage). This crate keeps
//! every mounted instance of a slice converged:
//!
//! - writes go through to the store and are announced on a broadcast bus
//! - stored data written under a different configuration, undecodable
//!   data and data the schema rejects are discarded in favour of the
//!   default, and the other contexts are told to do the same
//! - slices with an expiration reset to their default when it passes
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Config**: immutable slice definitions and declarative descriptors
//! - **Fingerprint**: checksum of the fields that shape stored data
//! - **Codec**: JSON encoding, optionally sealed under the realm secret
//! - **Validator**: the schema gate; errors and panics are rejections
//! - **Accessor**: reads, writes and repairs a slice's stored entries
//! - **Bus**: realm-wide fire-and-forget broadcast
//! - **Timer**: expiration countdown
//! - **Controller**: a mounted slice instance
//! - **Realm**: the store, bus, clock and cipher shared by contexts
//!
//! # Example
//!
//! ```
//! use slicesync_storage::MemoryStore;
//! use slicesync_sync::{Realm, SliceConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let tab_a = Realm::new(store.clone());
//! let tab_b = Realm::builder().store(store).bus(tab_a.bus().clone()).build();
//!
//! let counter = Arc::new(
//!     SliceConfig::builder("counter", 0_i64)
//!         .reducer("inc", |n: &i64, _| n + 1)
//!         .build()?,
//! );
//!
//! let a = tab_a.mount(counter.clone())?;
//! let b = tab_b.mount(counter)?;
//! let mut b_state = b.subscribe();
//!
//! a.dispatch("inc", serde_json::Value::Null)?;
//! assert_eq!(a.get(), 1);
//!
//! b_state.changed().await?;
//! assert_eq!(b.get(), 1);
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod bus;
pub mod codec;
mod config;
mod controller;
pub mod defaults;
mod error;
pub mod fingerprint;
mod realm;
pub mod timer;
pub mod validator;

pub use accessor::{ReadOutcome, Staleness, StoreAccessor};
pub use bus::{BroadcastBus, BusEndpoint, BusMessage, BusPublisher, DEFAULT_BUS_CAPACITY, EndpointId};
pub use codec::{Codec, CodecError};
pub use config::{
    Reducer, Selector, SliceCallback, SliceConfig, SliceConfigBuilder, SliceDescriptor,
    SliceEvents, SliceValue,
};
pub use controller::{BoundReducer, BoundSelector, SliceHandle, SliceSnapshot, SliceStatus};
pub use error::{ConfigError, SyncError, SyncResult};
pub use realm::{Realm, RealmBuilder, RealmConfig};
pub use timer::{ExpirationTimer, TimerState};
pub use validator::{SchemaValidator, Validation};

pub use slicesync_types::ExecutionMode;
