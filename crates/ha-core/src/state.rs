//! Entity state snapshots

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Context, EntityId, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// What an entity looked like after one write to the state store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,
    pub state: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Last time `state` took a new value
    pub last_changed: DateTime<Utc>,
    /// Last time `state` or `attributes` took a new value
    pub last_updated: DateTime<Utc>,
    /// Last write of any kind, including one that changed nothing
    pub last_reported: DateTime<Utc>,
    pub context: Context,
}

impl State {
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        State {
            entity_id,
            state: state.into(),
            attributes,
            context,
            last_changed: now,
            last_updated: now,
            last_reported: now,
        }
    }

    /// Successor snapshot for a write that replaced the value or attributes
    pub fn with_update(
        &self,
        state: impl Into<String>,
        attributes: HashMap<String, Value>,
        context: Context,
    ) -> Self {
        let mut next = State::new(self.entity_id.clone(), state, attributes, context);
        if next.state == self.state {
            next.last_changed = self.last_changed;
        }
        next
    }

    /// Same snapshot with only `last_reported` moved forward
    pub fn reported(&self) -> Self {
        State {
            last_reported: Utc::now(),
            ..self.clone()
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }
}

/// Equal when entity, value and attributes match; timestamps and context
/// are ignored
impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        (&self.entity_id, &self.state, &self.attributes)
            == (&other.entity_id, &other.state, &other.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn phone(state: &str) -> State {
        State::new(
            "sensor.phone".parse().unwrap(),
            state,
            HashMap::from([("battery".to_string(), json!(42))]),
            Context::new(),
        )
    }

    #[test]
    fn test_attribute_only_update_keeps_last_changed() {
        let before = phone("on");
        let after = before.with_update("on", HashMap::new(), Context::new());
        assert_eq!(after.last_changed, before.last_changed);
        assert!(after.last_updated >= before.last_updated);
        assert_ne!(after, before);
    }

    #[test]
    fn test_value_update_moves_last_changed() {
        let before = phone("on");
        let after = before.with_update("off", before.attributes.clone(), Context::new());
        assert_eq!(after.state, "off");
        assert_eq!(after.last_changed, after.last_updated);
    }

    #[test]
    fn test_reported_is_equal() {
        let before = phone("on");
        let again = before.reported();
        assert_eq!(again, before);
        assert_eq!(again.last_updated, before.last_updated);
        assert!(again.last_reported >= before.last_reported);
    }

    #[test]
    fn test_unknown_and_unavailable() {
        assert!(phone("unavailable").is_unavailable());
        assert!(phone("unknown").is_unknown());
        assert!(!phone("80").is_unknown());
        assert!(!phone("80").is_unavailable());
    }
}
