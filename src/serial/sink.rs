//! Single-slot subscriber registry between the reader thread and whoever
//! consumes received bytes.
//!
//! The reader thread never calls subscriber code. It pushes chunks into a
//! bounded channel; the consumer side runs [`dispatch`] on its own execution
//! context (an async task, a UI event loop) and hands chunks on from there.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Sending half held by the sink on behalf of a subscriber.
pub type Subscriber = mpsc::Sender<Vec<u8>>;

/// Outcome of a single publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    NoSubscriber,
    /// Subscriber queue was full; the chunk was discarded
    Dropped,
    /// Publisher is no longer allowed to deliver (reader stopping)
    Gated,
}

#[derive(Clone, Default)]
pub struct EventSink {
    slot: Arc<Mutex<Option<Subscriber>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Subscriber>> {
        // The slot holds no invariant a panicking holder could break.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current subscriber. The previous one sees its channel close.
    pub fn register(&self, subscriber: Subscriber) {
        let previous = self.lock_slot().replace(subscriber);
        if previous.is_some() {
            log::debug!("Replaced existing serial data subscriber");
        }
    }

    /// Create a bounded channel, register its sender and hand back the receiver.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.register(tx);
        rx
    }

    pub fn clear(&self) {
        if self.lock_slot().take().is_some() {
            log::debug!("Serial data subscriber cleared");
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.lock_slot().is_some()
    }

    pub fn publish(&self, chunk: &[u8]) -> Delivery {
        self.publish_if(chunk, || true)
    }

    /// Deliver `chunk` only if `allowed` still holds while the slot is locked.
    ///
    /// Paired with [`EventSink::fence`], this lets a producer be shut off
    /// such that no chunk it publishes afterwards reaches any subscriber.
    pub fn publish_if(&self, chunk: &[u8], allowed: impl FnOnce() -> bool) -> Delivery {
        let mut slot = self.lock_slot();
        if !allowed() {
            return Delivery::Gated;
        }
        let Some(subscriber) = slot.as_ref() else {
            return Delivery::NoSubscriber;
        };
        match subscriber.try_send(chunk.to_vec()) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                log::warn!("Serial data subscriber is lagging, dropped {} bytes", chunk.len());
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Serial data subscriber went away, clearing slot");
                *slot = None;
                Delivery::NoSubscriber
            }
        }
    }

    /// Wait for any publish that is currently holding the slot to finish.
    pub fn fence(&self) {
        drop(self.lock_slot());
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("has_subscriber", &self.has_subscriber())
            .finish()
    }
}

/// Consumer loop: hand each received chunk to `deliver`, in order, until the
/// subscriber is replaced or cleared. Returns the number of chunks delivered.
pub async fn dispatch<F>(mut rx: mpsc::Receiver<Vec<u8>>, mut deliver: F) -> u64
where
    F: FnMut(Vec<u8>),
{
    let mut delivered = 0u64;
    while let Some(chunk) = rx.recv().await {
        deliver(chunk);
        delivered += 1;
    }
    log::debug!("Serial data dispatch finished after {} chunks", delivered);
    delivered
}
