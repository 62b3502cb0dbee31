//! Event listener registry shared by both RPC endpoints.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

/// Callback invoked with an event's payload.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

type Registry = HashMap<String, Vec<(u64, EventHandler)>>;

/// Listeners keyed by event name; each registration is removable on its own.
#[derive(Clone, Default)]
pub struct Listeners {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        let counts: HashMap<&str, usize> = registry
            .iter()
            .map(|(event, handlers)| (event.as_str(), handlers.len()))
            .collect();
        f.debug_struct("Listeners").field("events", &counts).finish()
    }
}

impl Listeners {
    /// Register `handler` for `event`.
    pub fn add(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.registry)
            .entry(event.to_owned())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            event: event.to_owned(),
            id,
        }
    }

    /// Invoke every handler registered for `event`; returns how many ran.
    ///
    /// Handlers run outside the registry lock, so a handler may subscribe
    /// or unsubscribe without deadlocking.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        let handlers: Vec<EventHandler> = lock(&self.registry)
            .get(event)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(data);
        }
        handlers.len()
    }

    /// Number of handlers currently registered for `event`.
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        lock(&self.registry).get(event).map_or(0, Vec::len)
    }
}

/// Handle returned by `on`; removes exactly its own listener.
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    event: String,
    id: u64,
}

impl Subscription {
    /// Remove this listener. A no-op once the endpoint is gone.
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(handlers) = registry.get_mut(&self.event) {
            handlers.retain(|(id, _)| *id != self.id);
            if handlers.is_empty() {
                registry.remove(&self.event);
            }
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
