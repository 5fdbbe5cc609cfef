//! Inbound message fan-out.
//!
//! `MessageBroadcaster` keeps the registered observers and delivers two
//! kinds of notification: `notify_next` for every inbound message and a
//! single terminal `notify_error` when the session ends. Delivery iterates
//! a snapshot taken under the registry lock, so observers may subscribe or
//! unsubscribe from inside a callback. A separate delivery lock serializes
//! fan-outs against the terminal error: once `on_error` has started no
//! observer sees another `on_next`. Callbacks must not call `notify_next`
//! or `notify_error` on the same broadcaster.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

use ih_protocol::Message;

use crate::error::SessionClosedError;

/// Receives inbound messages and the terminal session error.
pub trait Observer: Send + Sync {
    fn on_next(&self, message: &Arc<Message>);

    fn on_error(&self, error: &SessionClosedError);
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(u64, Arc<dyn Observer>)>,
    terminated: bool,
}

/// Observer registry with snapshot-then-iterate delivery.
#[derive(Clone, Default)]
pub struct MessageBroadcaster {
    registry: Arc<Mutex<Registry>>,
    delivery: Arc<Mutex<()>>,
}

impl MessageBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `observer`. Registering the same instance again returns a
    /// handle to the existing registration.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
        let mut registry = self.lock();
        let existing = registry
            .observers
            .iter()
            .find(|(_, o)| Arc::ptr_eq(o, &observer))
            .map(|(id, _)| *id);

        let id = match existing {
            Some(id) => id,
            None => {
                registry.next_id += 1;
                let id = registry.next_id;
                registry.observers.push((id, observer));
                id
            }
        };

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            active: AtomicBool::new(true),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Whether the terminal error has been delivered.
    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    fn snapshot(&self) -> Option<Vec<Arc<dyn Observer>>> {
        let registry = self.lock();
        if registry.terminated {
            return None;
        }
        Some(registry.observers.iter().map(|(_, o)| o.clone()).collect())
    }

    /// Deliver `message` to every current observer in registration order.
    /// Returns how many observers were notified; zero once terminated.
    pub fn notify_next(&self, message: Arc<Message>) -> usize {
        let _delivering = self.deliver();
        let Some(observers) = self.snapshot() else {
            return 0;
        };
        for observer in &observers {
            observer.on_next(&message);
        }
        observers.len()
    }

    /// Deliver the terminal `error` once. Later calls, and any later
    /// `notify_next`, are ignored. Waits for an in-flight fan-out to finish.
    /// Returns whether this call delivered.
    pub fn notify_error(&self, error: &SessionClosedError) -> bool {
        let _delivering = self.deliver();
        let observers = {
            let mut registry = self.lock();
            if registry.terminated {
                return false;
            }
            registry.terminated = true;
            registry
                .observers
                .iter()
                .map(|(_, o)| o.clone())
                .collect::<Vec<_>>()
        };
        for observer in &observers {
            observer.on_error(error);
        }
        true
    }
}

impl std::fmt::Debug for MessageBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        f.debug_struct("MessageBroadcaster")
            .field("observers", &registry.observers.len())
            .field("terminated", &registry.terminated)
            .finish()
    }
}

/// Registration handle. Unsubscribes on `unsubscribe()` or drop; both are
/// idempotent.
#[must_use = "dropping a Subscription unregisters its observer"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    active: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observers
                .retain(|(id, _)| *id != self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ── Channel observer ──────────────────────────────────────────

/// Notification forwarded by [`ChannelObserver`].
#[derive(Debug, Clone)]
pub enum Notification {
    Message(Arc<Message>),
    Error(SessionClosedError),
}

/// Observer forwarding notifications into an unbounded tokio channel.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl Observer for ChannelObserver {
    fn on_next(&self, message: &Arc<Message>) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(Notification::Message(message.clone()));
    }

    fn on_error(&self, error: &SessionClosedError) {
        let _ = self.tx.send(Notification::Error(error.clone()));
    }
}
