//! Config entries
//!
//! One config entry is one configured instance of an integration. `data`
//! and `options` are persisted; the lifecycle state and its reason only live
//! in memory.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state_machine::InvalidTransition;

/// Where an entry is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    #[default]
    NotLoaded,
    SetupInProgress,
    Loaded,
    /// The integration rejected the entry or failed to set it up
    SetupError,
    UnloadInProgress,
    FailedUnload,
}

impl ConfigEntryState {
    /// Whether unload and reload may be started from this state
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ConfigEntryState::SetupInProgress
                | ConfigEntryState::UnloadInProgress
                | ConfigEntryState::FailedUnload
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub title: String,

    /// Set when the entry is created, never edited by options flows
    #[serde(default)]
    pub data: HashMap<String, Value>,

    /// Written by config and options flows
    #[serde(default)]
    pub options: HashMap<String, Value>,

    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default = "first_version")]
    pub minor_version: u32,

    #[serde(skip)]
    pub state: ConfigEntryState,
    /// Why the entry is in an error state
    #[serde(skip)]
    pub reason: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn first_version() -> u32 {
    1
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let created_at = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            version: first_version(),
            minor_version: first_version(),
            state: ConfigEntryState::default(),
            reason: None,
            created_at,
            modified_at: created_at,
        }
    }

    pub fn with_data(self, data: HashMap<String, Value>) -> Self {
        Self { data, ..self }
    }

    pub fn with_options(self, options: HashMap<String, Value>) -> Self {
        Self { options, ..self }
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// Move to `state`, recording `reason`; the state is left untouched when
    /// the lifecycle does not allow the move
    pub fn try_set_state(
        &mut self,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state = self.state.try_transition(state)?;
        self.reason = reason;
        Ok(())
    }
}

/// Fields to replace on an existing entry; `None` keeps the current value
#[derive(Debug, Default)]
pub struct ConfigEntryUpdate {
    pub options: Option<HashMap<String, Value>>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(self, options: HashMap<String, Value>) -> Self {
        Self {
            options: Some(options),
        }
    }

    /// Write the requested fields into `entry`; true when a value differed
    pub(crate) fn apply(self, entry: &mut ConfigEntry) -> bool {
        let changed = match self.options {
            Some(options) if entry.options != options => {
                entry.options = options;
                true
            }
            _ => false,
        };

        if changed {
            entry.modified_at = Utc::now();
        }
        changed
    }
}
