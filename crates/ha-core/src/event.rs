//! Events carried on the bus

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

const MATCH_ALL: &str = "*";

/// Payload with a fixed event type, e.g. the data of `state_changed`
pub trait EventData: Clone + Send + Sync + 'static {
    fn event_type() -> &'static str;
}

/// Name an event is fired and listened for under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(name: impl Into<String>) -> Self {
        EventType(name.into())
    }

    /// Wildcard type; listeners under it see every fired event
    pub fn match_all() -> Self {
        EventType(MATCH_ALL.to_owned())
    }

    pub fn is_match_all(&self) -> bool {
        self.0 == MATCH_ALL
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        EventType::new(name)
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        EventType(name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fired event. `T` defaults to untyped JSON, the form the bus stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
}

impl<T> Event<T> {
    /// Stamp a new event with the current time
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Event {
            event_type: event_type.into(),
            data,
            context,
            time_fired: Utc::now(),
        }
    }

    /// Convert the payload; everything else is carried over
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Event<U> {
        let Event {
            event_type,
            data,
            time_fired,
            context,
        } = self;
        Event {
            event_type,
            data: f(data),
            time_fired,
            context,
        }
    }
}

impl<T: EventData> Event<T> {
    pub fn typed(data: T, context: Context) -> Self {
        Event::new(T::event_type(), data, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_type() {
        assert!(EventType::match_all().is_match_all());
        assert!(!EventType::from("state_changed").is_match_all());
        assert_eq!(EventType::from(String::from("state_reported")).to_string(), "state_reported");
    }

    #[test]
    fn test_map_keeps_envelope() {
        let event = Event::new("state_changed", 1, Context::new());
        let fired = event.time_fired;
        let context_id = event.context.id.clone();

        let mapped = event.map(|n| n.to_string());
        assert_eq!(mapped.data, "1");
        assert_eq!(mapped.event_type.as_str(), "state_changed");
        assert_eq!(mapped.time_fired, fired);
        assert_eq!(mapped.context.id, context_id);
    }
}
