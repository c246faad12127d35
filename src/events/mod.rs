//! Client-side notifications.
//!
//! Components that used to hang listeners off a global window object register
//! with a [`NotificationHub`] instead. Registration hands back a
//! [`Subscription`] guard; dropping it deregisters the listener, so mount and
//! unmount map onto construction and drop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

use crate::models::TrialNotice;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// The backend answered 402 for some request
    TrialExpired(TrialNotice),
    /// The backend rejected the bearer token
    Unauthorized { path: String },
    /// A session store key was written or removed
    StorageChanged {
        key: String,
        value: Option<String>,
        origin: u64,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::TrialExpired(_) => "trial_expired",
            ClientEvent::Unauthorized { .. } => "unauthorized",
            ClientEvent::StorageChanged { .. } => "storage_changed",
        }
    }
}

/// What a listener did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep delivering to other listeners
    Continue,
    /// The event was handled; later listeners are skipped
    Handled,
}

/// Outcome of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub listeners: usize,
    pub handled: bool,
}

type Listener = Arc<dyn Fn(&ClientEvent) -> Disposition + Send + Sync>;

#[derive(Default)]
struct Registry {
    listeners: BTreeMap<u64, Listener>,
}

/// Listener registry shared by the API client, session manager and dashboard.
#[derive(Clone, Default)]
pub struct NotificationHub {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Listeners run in registration order.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ClientEvent) -> Disposition + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut registry) = self.registry.lock() {
            registry.listeners.insert(id, Arc::new(listener));
        }
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers an event to every listener until one reports it handled.
    pub fn publish(&self, event: ClientEvent) -> Delivery {
        // Snapshot so listeners may subscribe or unsubscribe while being called
        let listeners: Vec<Listener> = match self.registry.lock() {
            Ok(registry) => registry.listeners.values().cloned().collect(),
            Err(_) => {
                warn!("notification registry poisoned; dropping {}", event.name());
                return Delivery {
                    listeners: 0,
                    handled: false,
                };
            }
        };

        let mut delivery = Delivery {
            listeners: 0,
            handled: false,
        };
        for listener in listeners {
            delivery.listeners += 1;
            if listener(&event) == Disposition::Handled {
                delivery.handled = true;
                break;
            }
        }
        debug!(
            event = event.name(),
            listeners = delivery.listeners,
            handled = delivery.handled,
            "notification published"
        );
        delivery
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .lock()
            .map(|registry| registry.listeners.len())
            .unwrap_or(0)
    }
}

/// Guard returned by [`NotificationHub::subscribe`].
#[must_use = "dropping a Subscription immediately deregisters the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut registry) = registry.lock() {
                registry.listeners.remove(&self.id);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
