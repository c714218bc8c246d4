//! Current state of every entity
//!
//! Every write goes through [`StateStore::set`] or [`StateStore::remove`]
//! and is announced on the event bus: `state_changed` when the value or the
//! attributes differ from what was stored, `state_reported` when an
//! identical state is written again. Events are fired after the store is
//! updated and without holding any of its locks, so listeners may read or
//! write states themselves.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, instrument, trace};

use ha_core::events::{StateChangedData, StateReportedData};
use ha_core::{Context, EntityId, State};
use ha_event_bus::EventBus;

pub struct StateStore {
    states: DashMap<String, State>,
    /// domain -> entity ids with a state
    domains: DashMap<String, BTreeSet<String>>,
    bus: Arc<EventBus>,
}

impl StateStore {
    pub fn new(bus: Arc<EventBus>) -> Self {
        StateStore {
            states: DashMap::new(),
            domains: DashMap::new(),
            bus,
        }
    }

    /// Write a state and announce it
    ///
    /// Returns the stored snapshot. An identical write keeps `last_changed`
    /// and `last_updated` and only moves `last_reported`.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, Value>,
        context: Context,
    ) -> State {
        let state = state.into();
        let key = entity_id.to_string();
        let previous = self.get(&key);

        match previous {
            Some(old) if old.state == state && old.attributes == attributes => {
                let reported = old.reported();
                self.states.insert(key, reported.clone());
                trace!("Unchanged state reported");

                self.bus.fire_typed(
                    StateReportedData {
                        entity_id,
                        new_state: reported.clone(),
                        old_last_reported: old.last_reported,
                    },
                    context,
                );
                reported
            }
            previous => {
                let new_state = match &previous {
                    Some(old) => old.with_update(state, attributes, context.clone()),
                    None => State::new(entity_id.clone(), state, attributes, context.clone()),
                };
                self.states.insert(key.clone(), new_state.clone());
                if previous.is_none() {
                    self.domains
                        .entry(entity_id.domain().to_owned())
                        .or_default()
                        .insert(key);
                }
                debug!(state = %new_state.state, "State changed");

                self.bus.fire_typed(
                    StateChangedData {
                        entity_id,
                        old_state: previous,
                        new_state: Some(new_state.clone()),
                    },
                    context,
                );
                new_state
            }
        }
    }

    /// Drop an entity's state; announced as a `state_changed` with no new
    /// state
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let key = entity_id.to_string();
        let (_, old) = self.states.remove(&key)?;
        if let Some(mut ids) = self.domains.get_mut(entity_id.domain()) {
            ids.remove(&key);
        }
        trace!("State removed");

        self.bus.fire_typed(
            StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(old.clone()),
                new_state: None,
            },
            context,
        );
        Some(old)
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|state| state.value().clone())
    }

    /// Just the state string
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|state| state.state.clone())
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    /// Entity ids of `domain` that have a state, sorted
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domains
            .get(domain)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use ha_core::events::{STATE_CHANGED, STATE_REPORTED};
    use ha_core::Event;

    use super::*;

    fn setup() -> (Arc<EventBus>, StateStore) {
        let bus = Arc::new(EventBus::new());
        (bus.clone(), StateStore::new(bus))
    }

    fn battery(level: i64) -> HashMap<String, Value> {
        HashMap::from([("battery".to_string(), json!(level))])
    }

    fn phone() -> EntityId {
        "sensor.phone".parse().unwrap()
    }

    /// Events of `event_type` fired from now on
    fn record(bus: &EventBus, event_type: &str) -> Arc<Mutex<Vec<Event>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.listen(event_type, move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[test]
    fn test_written_state_is_readable() {
        let (_bus, store) = setup();
        store.set(phone(), "on", battery(42), Context::new());
        store.set("sensor.another".parse().unwrap(), "off", HashMap::new(), Context::new());

        let state = store.get("sensor.phone").unwrap();
        assert_eq!(state.state, "on");
        assert_eq!(state.attributes["battery"], 42);
        assert_eq!(store.get_state("sensor.another").as_deref(), Some("off"));
        assert_eq!(store.entity_ids("sensor"), ["sensor.another", "sensor.phone"]);
        assert!(store.entity_ids("light").is_empty());
    }

    #[test]
    fn test_identical_write_is_reported() {
        let (bus, store) = setup();
        let changed = record(&bus, STATE_CHANGED);
        let reported = record(&bus, STATE_REPORTED);

        let first = store.set(phone(), "on", battery(42), Context::new());
        let second = store.set(phone(), "on", battery(42), Context::new());
        assert_eq!(second.last_changed, first.last_changed);
        assert_eq!(second.last_updated, first.last_updated);
        assert!(second.last_reported >= first.last_reported);

        let changed = changed.lock().unwrap();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].data["old_state"].is_null());

        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].data["entity_id"], "sensor.phone");
        assert_eq!(reported[0].data["new_state"]["state"], "on");
    }

    #[test]
    fn test_attribute_only_change_is_a_change() {
        let (bus, store) = setup();
        let changed = record(&bus, STATE_CHANGED);
        let reported = record(&bus, STATE_REPORTED);

        store.set(phone(), "on", battery(42), Context::new());
        store.set(phone(), "on", battery(41), Context::new());

        let changed = changed.lock().unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(changed[1].data["old_state"]["attributes"]["battery"], 42);
        assert_eq!(changed[1].data["new_state"]["attributes"]["battery"], 41);
        assert!(reported.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_announces_empty_new_state() {
        let (bus, store) = setup();
        let changed = record(&bus, STATE_CHANGED);
        store.set(phone(), "on", HashMap::new(), Context::new());

        assert!(store.remove(&phone(), Context::new()).is_some());
        assert!(!store.contains("sensor.phone"));
        assert!(store.entity_ids("sensor").is_empty());
        assert!(store.remove(&phone(), Context::new()).is_none());

        let changed = changed.lock().unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(changed[1].data["old_state"]["state"], "on");
        assert!(changed[1].data["new_state"].is_null());
    }

    #[test]
    fn test_listener_may_read_the_store() {
        let (bus, store) = setup();
        let store = Arc::new(store);
        let seen = Arc::new(Mutex::new(None));

        let reader = Arc::clone(&store);
        let sink = Arc::clone(&seen);
        bus.listen(STATE_CHANGED, move |_event| {
            *sink.lock().unwrap() = reader.get_state("sensor.phone");
        });

        store.set(phone(), "80", HashMap::new(), Context::new());
        assert_eq!(seen.lock().unwrap().as_deref(), Some("80"));
    }
}
