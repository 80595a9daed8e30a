//! Expiration countdown for one slice instance.
//!
//! The timer does not touch the store. When its deadline passes it publishes
//! a detached [`BusMessage::Expired`], so the instance that owns it handles
//! the expiry through the same path as every other context in the realm.

use crate::bus::{BusMessage, BusPublisher};
use slicesync_types::{Clock, SliceKey};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Disarmed,
    /// Counting down to `deadline` (epoch milliseconds).
    Armed { deadline: u64 },
    Fired,
}

struct TimerInner {
    state: TimerState,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

pub struct ExpirationTimer {
    key: SliceKey,
    publisher: BusPublisher,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    inner: Arc<Mutex<TimerInner>>,
}

impl ExpirationTimer {
    pub fn new(
        key: SliceKey,
        publisher: BusPublisher,
        clock: Arc<dyn Clock>,
        runtime: Handle,
    ) -> Self {
        Self {
            key,
            publisher,
            clock,
            runtime,
            inner: Arc::new(Mutex::new(TimerInner {
                state: TimerState::Disarmed,
                task: None,
                generation: 0,
            })),
        }
    }

    /// Starts counting down to `stored_deadline`, replacing any pending
    /// countdown. A deadline in the past fires on the next scheduler tick.
    pub fn arm(&self, stored_deadline: u64) {
        let now = self.clock.now_millis();
        let deadline = stored_deadline.max(now);
        let delay = Duration::from_millis(deadline - now);

        let mut inner = lock(&self.inner);
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation += 1;
        inner.state = TimerState::Armed { deadline };

        let generation = inner.generation;
        let shared = Arc::clone(&self.inner);
        let publisher = self.publisher.clone();
        let key = self.key.clone();
        inner.task = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = lock(&shared);
                if inner.generation != generation {
                    return;
                }
                inner.state = TimerState::Fired;
                inner.task = None;
            }
            info!(%key, "slice expired");
            publisher.publish(BusMessage::Expired { key });
        }));
        debug!(key = %self.key, deadline, delay_ms = delay.as_millis() as u64, "expiration armed");
    }

    /// Drops the pending countdown, if any.
    pub fn cancel(&self) {
        let mut inner = lock(&self.inner);
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation += 1;
        if matches!(inner.state, TimerState::Armed { .. }) {
            inner.state = TimerState::Disarmed;
        }
    }

    pub fn state(&self) -> TimerState {
        lock(&self.inner).state
    }
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock(inner: &Mutex<TimerInner>) -> MutexGuard<'_, TimerInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
