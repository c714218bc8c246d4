//! Per-entity state tracking
//!
//! Helpers that attach a typed callback to `state_changed` or
//! `state_reported` events of a fixed set of entities. Each helper returns a
//! [`Subscription`]; the listener lives exactly as long as that handle.
//!
//! Callbacks return a `Result`. Failures are logged here at error level, the
//! same way the host reports an exception raised by a state listener.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

use ha_core::events::{StateChangedData, StateReportedData, STATE_CHANGED, STATE_REPORTED};
use ha_core::{Event, EventData};
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::{EventBus, Subscription};

/// Track `state_changed` events for the given entity ids
pub fn track_state_change_event<F, E>(
    bus: &Arc<EventBus>,
    entity_ids: &[String],
    action: F,
) -> Subscription
where
    F: Fn(Event<StateChangedData>) -> Result<(), E> + Send + Sync + 'static,
    E: Display,
{
    track_entity_event(bus, STATE_CHANGED, entity_ids, action)
}

/// Track `state_reported` events for the given entity ids
///
/// These fire when an entity writes the same state and attributes again.
pub fn track_state_report_event<F, E>(
    bus: &Arc<EventBus>,
    entity_ids: &[String],
    action: F,
) -> Subscription
where
    F: Fn(Event<StateReportedData>) -> Result<(), E> + Send + Sync + 'static,
    E: Display,
{
    track_entity_event(bus, STATE_REPORTED, entity_ids, action)
}

fn track_entity_event<T, F, E>(
    bus: &Arc<EventBus>,
    event_type: &'static str,
    entity_ids: &[String],
    action: F,
) -> Subscription
where
    T: EventData + DeserializeOwned,
    F: Fn(Event<T>) -> Result<(), E> + Send + Sync + 'static,
    E: Display,
{
    debug_assert_eq!(T::event_type(), event_type);
    let entity_ids: HashSet<String> = entity_ids.iter().map(|id| id.to_lowercase()).collect();

    bus.listen_scoped(event_type, move |event| {
        let Some(entity_id) = event.data.get("entity_id").and_then(|v| v.as_str()) else {
            return;
        };
        if !entity_ids.contains(entity_id) {
            return;
        }

        let data = match serde_json::from_value::<T>(event.data.clone()) {
            Ok(data) => data,
            Err(err) => {
                warn!(entity_id, event_type, "Malformed event payload: {}", err);
                return;
            }
        };

        if let Err(err) = action(event.clone().map(|_| data)) {
            error!(
                entity_id,
                event_type, "Error handling state event for {}: {}", entity_id, err
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::{Context, EntityId, State};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn changed(entity_id: &str, state: &str) -> StateChangedData {
        let entity_id: EntityId = entity_id.parse().unwrap();
        StateChangedData {
            entity_id: entity_id.clone(),
            old_state: None,
            new_state: Some(State::new(entity_id, state, HashMap::new(), Context::new())),
        }
    }

    #[test]
    fn test_only_tracked_entities_are_delivered() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _sub = track_state_change_event(
            &bus,
            &["sensor.source".to_string()],
            move |event| -> Result<(), String> {
                let state = event.data.new_state.map(|s| s.state);
                seen_clone.lock().unwrap().push(state);
                Ok(())
            },
        );

        bus.fire_typed(changed("sensor.other", "1"), Context::new());
        bus.fire_typed(changed("sensor.source", "2"), Context::new());

        assert_eq!(*seen.lock().unwrap(), vec![Some("2".to_string())]);
    }

    #[test]
    fn test_report_events_are_typed() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(0));
        let seen_clone = seen.clone();

        let _sub = track_state_report_event(
            &bus,
            &["sensor.source".to_string()],
            move |event| -> Result<(), String> {
                assert_eq!(event.data.new_state.state, "on");
                *seen_clone.lock().unwrap() += 1;
                Ok(())
            },
        );

        let entity_id: EntityId = "sensor.source".parse().unwrap();
        let state = State::new(entity_id.clone(), "on", HashMap::new(), Context::new());
        bus.fire_typed(
            StateReportedData {
                entity_id,
                old_last_reported: state.last_reported,
                new_state: state,
            },
            Context::new(),
        );
        // A state_changed event for the same entity is not a report
        bus.fire_typed(changed("sensor.source", "on"), Context::new());

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_failing_action_keeps_listener() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();

        let _sub = track_state_change_event(&bus, &["sensor.source".to_string()], move |_| {
            *calls_clone.lock().unwrap() += 1;
            Err("boom")
        });

        bus.fire_typed(changed("sensor.source", "1"), Context::new());
        bus.fire_typed(changed("sensor.source", "2"), Context::new());
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_dropping_subscription_stops_tracking() {
        let bus = Arc::new(EventBus::new());
        let sub = track_state_change_event(
            &bus,
            &["sensor.source".to_string()],
            |_| -> Result<(), String> { Ok(()) },
        );
        assert_eq!(bus.listener_count(STATE_CHANGED), 1);
        drop(sub);
        assert_eq!(bus.listener_count(STATE_CHANGED), 0);
    }
}
