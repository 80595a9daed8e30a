//! Realm-wide broadcast bus.
//!
//! Every mounted slice instance holds a [`BusEndpoint`]. Messages published
//! through an endpoint reach every *other* endpoint on the bus; messages
//! published through a detached [`BusPublisher`] reach all of them.
//!
//! Delivery is fire-and-forget and at-most-once: an endpoint that falls more
//! than the bus capacity behind loses the oldest messages and carries on.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slicesync_types::SliceKey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

/// Default number of messages buffered per endpoint.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// A notification about one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BusMessage {
    /// The stored value was found stale and reset to the default.
    ConfigInvalidated { key: SliceKey },
    /// A context wrote a new value.
    ValueChanged { key: SliceKey, value: Value },
    /// The slice's expiration deadline passed.
    Expired { key: SliceKey },
}

impl BusMessage {
    /// The slice this message is about.
    pub fn key(&self) -> &SliceKey {
        match self {
            Self::ConfigInvalidated { key }
            | Self::ValueChanged { key, .. }
            | Self::Expired { key } => key,
        }
    }
}

/// Identifies an endpoint on its bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

#[derive(Debug, Clone)]
struct Envelope {
    origin: Option<EndpointId>,
    message: BusMessage,
}

struct BusInner {
    sender: RwLock<Option<broadcast::Sender<Envelope>>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// One broadcast channel shared by every context of a realm.
#[derive(Clone)]
pub struct BroadcastBus {
    inner: Arc<BusInner>,
}

impl BroadcastBus {
    /// Opens a bus buffering up to `capacity` messages per endpoint.
    pub fn open(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                sender: RwLock::new(Some(sender)),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Closes the bus. Endpoints drain what is buffered and then stop;
    /// later publishes are dropped.
    pub fn close(&self) {
        let closed = self
            .inner
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if closed.is_some() {
            debug!("broadcast bus closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of live endpoints.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Attaches a new endpoint.
    pub fn subscribe(&self) -> SyncResult<BusEndpoint> {
        let receiver = self
            .inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(SyncError::BusClosed)?;
        let id = EndpointId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        Ok(BusEndpoint {
            id,
            bus: self.clone(),
            receiver,
        })
    }

    /// A publisher without an origin: its messages reach every endpoint.
    pub fn detached_publisher(&self) -> BusPublisher {
        BusPublisher {
            origin: None,
            bus: self.clone(),
        }
    }

    fn send(&self, envelope: Envelope) {
        let sender = self.inner.sender.read().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            // An error only means nobody is listening.
            Some(sender) => {
                let _ = sender.send(envelope);
            }
            None => debug!(key = %envelope.message.key(), "bus closed; dropping message"),
        }
    }
}

impl std::fmt::Debug for BroadcastBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastBus")
            .field("open", &self.is_open())
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Sends messages on behalf of an endpoint, or detached.
#[derive(Debug, Clone)]
pub struct BusPublisher {
    origin: Option<EndpointId>,
    bus: BroadcastBus,
}

impl BusPublisher {
    pub fn publish(&self, message: BusMessage) {
        self.bus.send(Envelope {
            origin: self.origin,
            message,
        });
    }
}

/// A subscription to the bus. Dropping it unsubscribes.
pub struct BusEndpoint {
    id: EndpointId,
    bus: BroadcastBus,
    receiver: broadcast::Receiver<Envelope>,
}

impl BusEndpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// A publisher whose messages this endpoint will not see.
    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            origin: Some(self.id),
            bus: self.bus.clone(),
        }
    }

    pub fn publish(&self, message: BusMessage) {
        self.publisher().publish(message);
    }

    /// Waits for the next message from someone else.
    ///
    /// Returns `None` once the bus is closed and drained.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.origin == Some(self.id) => continue,
                Ok(envelope) => return Some(envelope.message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(endpoint = self.id.0, skipped, "bus endpoint lagged; messages dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered message from someone else, if any.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) if envelope.origin == Some(self.id) => continue,
                Ok(envelope) => return Some(envelope.message),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(endpoint = self.id.0, skipped, "bus endpoint lagged; messages dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

impl std::fmt::Debug for BusEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusEndpoint").field("id", &self.id).finish()
    }
}
