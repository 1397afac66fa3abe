//! Observer-style subscriptions for gateway and connection events.
//!
//! Handlers run synchronously on the emitting task, in subscription order, and see every
//! event of a source operation in the order it was produced. The registry lock is released
//! before handlers run, so a handler may subscribe or unsubscribe.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;

/// Returns false when the handler should be dropped (its consumer is gone).
type Handler<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

/// A set of subscribers for one event type.
pub struct Emitter<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Register a handler. It stays registered until [`Subscription::unsubscribe`] is called;
    /// dropping the subscription handle does not remove it.
    pub fn subscribe<F>(&self, handler: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.register(Arc::new(move |event: &T| {
            handler(event);
            true
        }))
    }

    fn register(&self, handler: Handler<T>) -> Subscription<T> {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn emit(&self, event: &T) {
        let handlers: Vec<(u64, Handler<T>)> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();
        let closed: Vec<u64> = handlers
            .into_iter()
            .filter(|(_, handler)| !handler(event))
            .map(|(id, _)| id)
            .collect();
        if !closed.is_empty() {
            self.registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handlers
                .retain(|(id, _)| !closed.contains(id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }
}

impl<T: Clone + Send + 'static> Emitter<T> {
    /// Forward events into an unbounded channel, for consumers that live on another task.
    /// The handler is removed on the first event after the receiver is dropped.
    pub fn subscribe_channel(&self) -> (mpsc::UnboundedReceiver<T>, Subscription<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.register(Arc::new(move |event: &T| tx.send(event.clone()).is_ok()));
        (rx, subscription)
    }
}

/// Handle returned by [`Emitter::subscribe`].
pub struct Subscription<T> {
    id: u64,
    registry: Weak<Mutex<Registry<T>>>,
}

impl<T> Subscription<T> {
    /// Remove the handler. Returns false if the emitter is gone or the handler was already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.handlers.len();
        registry.handlers.retain(|(id, _)| *id != self.id);
        registry.handlers.len() != before
    }
}
