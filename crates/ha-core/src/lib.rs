//! Shared vocabulary of the workspace: entity ids, state snapshots, events
//! and their contexts, plus the state and attribute names every crate agrees
//! on.

mod context;
mod entity_id;
mod event;
mod state;

pub use context::Context;
pub use entity_id::{valid_entity_id, EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use state::State;

/// Longest state string an entity may publish
pub const MAX_STATE_LENGTH: usize = 255;

pub const STATE_UNKNOWN: &str = "unknown";
pub const STATE_UNAVAILABLE: &str = "unavailable";

pub mod attrs {
    pub const ATTR_ENTITY_ID: &str = "entity_id";
    pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
    pub const ATTR_ICON: &str = "icon";
    pub const ATTR_DEVICE_CLASS: &str = "device_class";
    pub const ATTR_STATE_CLASS: &str = "state_class";
    pub const ATTR_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
}

/// Events fired by the state store
pub mod events {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    use crate::{EntityId, EventData, State};

    pub const STATE_CHANGED: &str = "state_changed";
    pub const STATE_REPORTED: &str = "state_reported";

    /// A write that added, replaced or removed a state. `old_state` is
    /// `None` for a new entity and `new_state` is `None` for a removal.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// A write that repeated the current value and attributes
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StateReportedData {
        pub entity_id: EntityId,
        pub new_state: State,
        pub old_last_reported: DateTime<Utc>,
    }

    impl EventData for StateReportedData {
        fn event_type() -> &'static str {
            STATE_REPORTED
        }
    }
}
