//! Slice controller: one mounted instance of a slice in one context.
//!
//! A [`SliceHandle`] owns the in-memory value, writes through to the store,
//! and keeps itself converged with every other instance of the same slice by
//! listening on the realm bus. Each instance runs up to three tokio tasks:
//! the bus listener, the expiration countdown and, for server-rendered
//! slices, a one-shot hydration that reconciles with the store.
//!
//! All read-modify-write sequences on one instance are serialized through a
//! single lock. Callbacks run outside that lock, so they may call back into
//! the handle.

use crate::accessor::StoreAccessor;
use crate::bus::{BusEndpoint, BusMessage, BusPublisher};
use crate::config::{SliceConfig, SliceValue};
use crate::error::{ConfigError, SyncError, SyncResult};
use crate::realm::Realm;
use crate::timer::ExpirationTimer;
use crate::validator::{self, Validation};
use serde_json::Value;
use slicesync_types::{ExecutionMode, SliceKey};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Whether an instance has reconciled with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    /// Showing the server default; the store has not been read yet.
    Initializing,
    Ready,
    /// Reconciliation with the store failed; the server default stays.
    Failed,
}

/// The observable state of a mounted slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceSnapshot<T> {
    pub value: T,
    pub status: SliceStatus,
}

impl<T> SliceSnapshot<T> {
    pub fn is_ready(&self) -> bool {
        self.status == SliceStatus::Ready
    }
}

struct Shared<T: SliceValue> {
    config: Arc<SliceConfig<T>>,
    accessor: Option<StoreAccessor<T>>,
    state: watch::Sender<SliceSnapshot<T>>,
    publisher: BusPublisher,
    timer: Option<ExpirationTimer>,
    write_lock: Mutex<()>,
}

/// A mounted slice.
///
/// Dropping the handle (or calling [`SliceHandle::unmount`]) stops its tasks
/// and detaches it from the bus.
pub struct SliceHandle<T: SliceValue> {
    shared: Arc<Shared<T>>,
    listener: JoinHandle<()>,
    hydration: Option<JoinHandle<()>>,
}

impl<T: SliceValue> SliceHandle<T> {
    pub(crate) fn mount(realm: &Realm, config: Arc<SliceConfig<T>>) -> SyncResult<Self> {
        let key = config.key().clone();
        validate_defaults(&config)?;

        let server_rendered = config.is_server_rendered();
        let store_unavailable = || SyncError::StoreUnavailable {
            key: key.to_string(),
        };
        if !server_rendered && realm.store().is_none() {
            return Err(store_unavailable());
        }

        let runtime = Handle::try_current().map_err(|_| SyncError::RuntimeUnavailable {
            key: key.to_string(),
        })?;

        // Subscribe before the first read so no write after it is missed.
        let endpoint = realm.bus().subscribe()?;
        let publisher = endpoint.publisher();

        let accessor = realm.store().map(|store| {
            StoreAccessor::new(
                Arc::clone(&config),
                Arc::clone(store),
                Arc::clone(realm.cipher()),
                Arc::clone(realm.clock()),
            )
        });

        let timer = match (&accessor, config.expire()) {
            (Some(_), Some(_)) => Some(ExpirationTimer::new(
                key.clone(),
                realm.bus().detached_publisher(),
                Arc::clone(realm.clock()),
                runtime.clone(),
            )),
            _ => None,
        };

        let initial = match config.default_server() {
            Some(server_default) => SliceSnapshot {
                value: server_default.clone(),
                status: SliceStatus::Initializing,
            },
            None => {
                let Some(accessor) = &accessor else {
                    return Err(store_unavailable());
                };
                let outcome = accessor.read_value()?;
                if outcome.is_stale() {
                    publisher.publish(BusMessage::ConfigInvalidated { key: key.clone() });
                }
                SliceSnapshot {
                    value: outcome.value,
                    status: SliceStatus::Ready,
                }
            }
        };

        let (state, _) = watch::channel(initial);
        let shared = Arc::new(Shared {
            config,
            accessor,
            state,
            publisher,
            timer,
            write_lock: Mutex::new(()),
        });

        if !server_rendered {
            shared.rearm()?;
        }

        let listener = runtime.spawn(listen(Arc::clone(&shared), endpoint));
        let hydration = server_rendered.then(|| runtime.spawn(hydrate(Arc::clone(&shared))));

        info!(%key, server_rendered, "slice mounted");
        Ok(Self {
            shared,
            listener,
            hydration,
        })
    }

    pub fn key(&self) -> &SliceKey {
        self.shared.config.key()
    }

    pub fn config(&self) -> &SliceConfig<T> {
        &self.shared.config
    }

    /// The current in-memory value.
    pub fn get(&self) -> T {
        self.shared.state.borrow().value.clone()
    }

    pub fn snapshot(&self) -> SliceSnapshot<T> {
        self.shared.state.borrow().clone()
    }

    pub fn status(&self) -> SliceStatus {
        self.shared.state.borrow().status
    }

    pub fn is_ready(&self) -> bool {
        self.status() == SliceStatus::Ready
    }

    /// Observes every change to the in-memory state.
    pub fn subscribe(&self) -> watch::Receiver<SliceSnapshot<T>> {
        self.shared.state.subscribe()
    }

    /// Replaces the value everywhere.
    pub fn set(&self, value: T) -> SyncResult<()> {
        self.update(|_| value).map(|_| ())
    }

    /// Replaces the value with `f(current)` and returns the new value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> SyncResult<T> {
        let accessor = self.shared.accessor()?;
        let next = {
            let _guard = self.shared.lock();
            let current = self.shared.state.borrow().value.clone();
            let next = f(&current);
            self.shared.write_through(accessor, &next)?;
            next
        };
        self.shared.announce(&next)?;
        Ok(next)
    }

    /// Runs reducer `name` against the stored value and persists the result.
    pub fn dispatch(&self, name: &str, payload: Value) -> SyncResult<T> {
        let config = &self.shared.config;
        let reducer = config
            .reducer(name)
            .ok_or_else(|| SyncError::UnknownReducer {
                key: config.key().to_string(),
                name: name.to_string(),
            })?
            .clone();
        let accessor = self.shared.accessor()?;

        let next = {
            let _guard = self.shared.lock();
            // No invalidation on a stale read: peers would delete the value
            // written below. The value-changed replaces it for them.
            let current = accessor.read_value()?;
            let next = reducer(&current.value, &payload);
            self.shared.write_through(accessor, &next)?;
            next
        };
        self.shared.announce(&next)?;
        Ok(next)
    }

    /// Runs selector `name` against the in-memory value.
    pub fn select(&self, name: &str, payload: Value) -> SyncResult<Value> {
        let config = &self.shared.config;
        let selector = config
            .selector(name)
            .ok_or_else(|| SyncError::UnknownSelector {
                key: config.key().to_string(),
                name: name.to_string(),
            })?;
        let current = self.shared.state.borrow().value.clone();
        Ok(selector(&current, &payload))
    }

    /// Every configured reducer, bound to this instance.
    pub fn reducers(&self) -> BTreeMap<&str, BoundReducer<'_, T>> {
        self.shared
            .config
            .reducer_names()
            .map(|name| (name, BoundReducer { handle: self, name }))
            .collect()
    }

    /// Every configured selector, bound to this instance.
    pub fn selectors(&self) -> BTreeMap<&str, BoundSelector<'_, T>> {
        self.shared
            .config
            .selector_names()
            .map(|name| (name, BoundSelector { handle: self, name }))
            .collect()
    }

    /// Stops this instance. Equivalent to dropping it.
    pub fn unmount(self) {}
}

impl<T: SliceValue> Drop for SliceHandle<T> {
    fn drop(&mut self) {
        self.listener.abort();
        if let Some(hydration) = &self.hydration {
            hydration.abort();
        }
        if let Some(timer) = &self.shared.timer {
            timer.cancel();
        }
        debug!(key = %self.shared.config.key(), "slice unmounted");
    }
}

impl<T: SliceValue + std::fmt::Debug> std::fmt::Debug for SliceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceHandle")
            .field("key", self.key())
            .field("state", &*self.shared.state.borrow())
            .finish()
    }
}

/// A reducer bound to a mounted slice.
pub struct BoundReducer<'a, T: SliceValue> {
    handle: &'a SliceHandle<T>,
    name: &'a str,
}

impl<T: SliceValue> BoundReducer<'_, T> {
    pub fn call(&self, payload: Value) -> SyncResult<T> {
        self.handle.dispatch(self.name, payload)
    }
}

/// A selector bound to a mounted slice.
pub struct BoundSelector<'a, T: SliceValue> {
    handle: &'a SliceHandle<T>,
    name: &'a str,
}

impl<T: SliceValue> BoundSelector<'_, T> {
    pub fn call(&self, payload: Value) -> SyncResult<Value> {
        self.handle.select(self.name, payload)
    }
}

fn validate_defaults<T: SliceValue>(config: &SliceConfig<T>) -> SyncResult<()> {
    let mut defaults = vec![(ExecutionMode::Client, config.default_client())];
    if let Some(server) = config.default_server() {
        defaults.push((ExecutionMode::Server, server));
    }
    for (mode, value) in defaults {
        if let Validation::Rejected(reason) = validator::validate(value, config.schema()) {
            return Err(ConfigError::DefaultRejected {
                key: config.key().to_string(),
                mode,
                reason,
            }
            .into());
        }
    }
    Ok(())
}

impl<T: SliceValue> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accessor(&self) -> SyncResult<&StoreAccessor<T>> {
        self.accessor.as_ref().ok_or_else(|| SyncError::StoreUnavailable {
            key: self.config.key().to_string(),
        })
    }

    fn adopt(&self, value: T) {
        self.state.send_modify(|snapshot| snapshot.value = value);
    }

    /// Persists `value` and adopts it. Caller holds the write lock.
    fn write_through(&self, accessor: &StoreAccessor<T>, value: &T) -> SyncResult<()> {
        accessor.write_value(value)?;
        self.adopt(value.clone());
        Ok(())
    }

    /// Tells the other contexts about a local write.
    fn announce(&self, value: &T) -> SyncResult<()> {
        self.publisher.publish(BusMessage::ValueChanged {
            key: self.config.key().clone(),
            value: serde_json::to_value(value)?,
        });
        self.rearm()
    }

    fn invalidate_peers(&self) {
        self.publisher.publish(BusMessage::ConfigInvalidated {
            key: self.config.key().clone(),
        });
    }

    /// Restarts the countdown from the stored deadline.
    fn rearm(&self) -> SyncResult<()> {
        let (Some(timer), Some(accessor)) = (&self.timer, &self.accessor) else {
            return Ok(());
        };
        let deadline = match accessor.read_expiration()? {
            Some(deadline) => deadline,
            None => match accessor.reset_expiration()? {
                Some(deadline) => deadline,
                None => return Ok(()),
            },
        };
        timer.arm(deadline);
        Ok(())
    }

    fn handle(&self, message: BusMessage) -> SyncResult<()> {
        match message {
            BusMessage::ValueChanged { value, .. } => self.on_value_changed(value),
            BusMessage::ConfigInvalidated { .. } => self.on_config_invalidated(),
            BusMessage::Expired { .. } => self.on_expired(),
        }
    }

    fn on_value_changed(&self, value: Value) -> SyncResult<()> {
        let incoming: T = match serde_json::from_value(value) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(key = %self.config.key(), error = %e, "ignoring undecodable value-changed");
                return Ok(());
            }
        };
        if self.state.borrow().value == incoming {
            return Ok(());
        }

        if let Some(on_change) = &self.config.events().on_change {
            on_change(&incoming);
        }
        {
            let _guard = self.lock();
            self.adopt(incoming);
        }
        debug!(key = %self.config.key(), "adopted value from another context");
        self.rearm()
    }

    fn on_config_invalidated(&self) -> SyncResult<()> {
        let _guard = self.lock();
        self.adopt(self.config.default_client().clone());
        if let Some(accessor) = &self.accessor {
            accessor.remove_value()?;
        }
        debug!(key = %self.config.key(), "reset to default after invalidation");
        Ok(())
    }

    fn on_expired(&self) -> SyncResult<()> {
        let default = self.config.default_client().clone();
        let Some(accessor) = &self.accessor else {
            let _guard = self.lock();
            self.adopt(default);
            return Ok(());
        };

        let stored = {
            let _guard = self.lock();
            accessor.read_value()?.value
        };
        if stored != default {
            if let Some(on_expire) = &self.config.events().on_expire {
                on_expire(&default);
            }
        }

        let deadline = {
            let _guard = self.lock();
            accessor.remove_value()?;
            let deadline = accessor.reset_expiration()?;
            self.adopt(default);
            deadline
        };
        if let (Some(timer), Some(deadline)) = (&self.timer, deadline) {
            timer.arm(deadline);
        }
        Ok(())
    }
}

async fn listen<T: SliceValue>(shared: Arc<Shared<T>>, mut endpoint: BusEndpoint) {
    while let Some(message) = endpoint.recv().await {
        if message.key() != shared.config.key() {
            continue;
        }
        if let Err(e) = shared.handle(message) {
            warn!(key = %shared.config.key(), error = %e, "failed to apply bus message");
        }
    }
    debug!(key = %shared.config.key(), "bus closed; listener stopped");
}

async fn hydrate<T: SliceValue>(shared: Arc<Shared<T>>) {
    tokio::task::yield_now().await;

    let Some(accessor) = &shared.accessor else {
        debug!(key = %shared.config.key(), "no store in this context; keeping server default");
        return;
    };

    let outcome = {
        let _guard = shared.lock();
        match accessor.read_value() {
            Ok(outcome) => {
                shared.state.send_replace(SliceSnapshot {
                    value: outcome.value.clone(),
                    status: SliceStatus::Ready,
                });
                outcome
            }
            Err(e) => {
                warn!(key = %shared.config.key(), error = %e, "hydration failed");
                shared
                    .state
                    .send_modify(|snapshot| snapshot.status = SliceStatus::Failed);
                return;
            }
        }
    };
    if outcome.is_stale() {
        shared.invalidate_peers();
    }
    if let Err(e) = shared.rearm() {
        warn!(key = %shared.config.key(), error = %e, "failed to arm expiration");
    }
    debug!(key = %shared.config.key(), "hydrated from store");
}
