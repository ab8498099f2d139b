//! Typed event streams with explicit subscribe/unsubscribe handles.
//!
//! Components expose an [`EventBus`] per event kind (transcripts, pauses,
//! tier changes). Subscribing returns a [`Subscription`] handle; the handle
//! must be unsubscribed explicitly — dropping it leaves the callback attached
//! for the lifetime of the bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Multi-subscriber event stream.
///
/// Emission is synchronous: every live callback runs on the emitting thread
/// before `emit` returns, so callbacks must stay cheap (sub-millisecond) —
/// the audio frame path runs through them.
pub struct EventBus<T> {
    subscribers: Arc<Mutex<Vec<(u64, Callback<T>)>>>,
    next_id: AtomicU64,
}

impl<T: 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a callback and returns a handle that detaches it.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Box::new(callback)));

        let subscribers = Arc::downgrade(&self.subscribers);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(subscribers) = subscribers.upgrade() {
                    subscribers
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .retain(|(sub_id, _)| *sub_id != id);
                }
            })),
        }
    }

    /// Delivers an event to every subscriber in subscription order.
    pub fn emit(&self, event: &T) {
        let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, callback) in subscribers.iter() {
            callback(event);
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<T: 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one subscription on an [`EventBus`].
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Detaches the callback from its bus.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}
