//! The event bus
//!
//! Callbacks registered with [`EventBus::listen`] run on the firing task in
//! registration order before [`EventBus::fire`] returns. A callback may
//! fire further events or add and remove listeners; the bus holds none of
//! its locks while callbacks run. [`tracking`] builds per-entity state
//! listeners on top of [`EventBus::listen_scoped`].

pub mod tracking;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, trace};

use ha_core::{Context, Event, EventData, EventType};

pub use tracking::{track_state_change_event, track_state_report_event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type EventCallback = Arc<dyn Fn(&Event<Value>) + Send + Sync>;

struct Listener {
    id: ListenerId,
    callback: EventCallback,
}

pub struct EventBus {
    listeners: DashMap<EventType, Vec<Listener>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `callback` for every event of `event_type` until
    /// [`EventBus::remove_listener`] is called with the returned id
    pub fn listen<F>(&self, event_type: impl Into<EventType>, callback: F) -> ListenerId
    where
        F: Fn(&Event<Value>) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!(%event_type, listener = id.0, "Listener added");
        self.listeners.entry(event_type).or_default().push(Listener {
            id,
            callback: Arc::new(callback),
        });
        id
    }

    /// Like [`EventBus::listen`], with the listener removed when the
    /// returned [`Subscription`] goes away
    pub fn listen_scoped<F>(
        self: &Arc<Self>,
        event_type: impl Into<EventType>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&Event<Value>) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = self.listen(event_type.clone(), callback);
        Subscription {
            bus: Arc::downgrade(self),
            event_type,
            id,
        }
    }

    /// False when no such listener was registered
    pub fn remove_listener(&self, event_type: &EventType, id: ListenerId) -> bool {
        let removed = match self.listeners.get_mut(event_type) {
            Some(mut listeners) => {
                let count = listeners.len();
                listeners.retain(|listener| listener.id != id);
                listeners.len() < count
            }
            None => false,
        };
        self.listeners
            .remove_if(event_type, |_, listeners| listeners.is_empty());
        removed
    }

    /// Run the callbacks for `event`, then those of [`EventType::match_all`]
    pub fn fire(&self, event: Event<Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        let wildcard = EventType::match_all();
        let mut types = vec![&event.event_type];
        if !event.event_type.is_match_all() {
            types.push(&wildcard);
        }

        let mut callbacks: Vec<EventCallback> = Vec::new();
        for event_type in types {
            if let Some(listeners) = self.listeners.get(event_type) {
                callbacks.extend(listeners.iter().map(|listener| Arc::clone(&listener.callback)));
            }
        }

        for callback in callbacks {
            callback(&event);
        }
    }

    /// Fire `data` under its own event type
    pub fn fire_typed<T: EventData + Serialize>(&self, data: T, context: Context) {
        match serde_json::to_value(&data) {
            Ok(payload) => self.fire(Event::new(T::event_type(), payload, context)),
            Err(err) => error!("Cannot serialize {} event: {}", T::event_type(), err),
        }
    }

    pub fn listener_count(&self, event_type: impl Into<EventType>) -> usize {
        self.listeners
            .get(&event_type.into())
            .map_or(0, |listeners| listeners.len())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

/// Keeps a listener registered; dropping it removes the listener
#[must_use = "the listener is removed as soon as the Subscription is dropped"]
pub struct Subscription {
    bus: Weak<EventBus>,
    event_type: EventType,
    id: ListenerId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_listener(&self.event_type, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription({}, {})", self.event_type, self.id.0)
    }
}
