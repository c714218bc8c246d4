//! Lifecycle transitions of a config entry
//!
//! ```text
//! not_loaded ─▶ setup_in_progress ─▶ loaded | setup_error
//! loaded | setup_error ─▶ unload_in_progress
//! setup_error ─▶ setup_in_progress
//! unload_in_progress ─▶ not_loaded | failed_unload
//! ```
//!
//! `failed_unload` has no way out.

use std::fmt;

use thiserror::Error;

use crate::entry::ConfigEntryState;

/// A lifecycle change the entry's current state does not allow
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Config entry cannot go from {from} to {to}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// States reachable from this one in a single step
    pub fn successors(self) -> &'static [ConfigEntryState] {
        use ConfigEntryState::*;

        match self {
            NotLoaded => &[SetupInProgress],
            SetupInProgress => &[Loaded, SetupError],
            Loaded => &[UnloadInProgress],
            SetupError => &[SetupInProgress, UnloadInProgress],
            UnloadInProgress => &[NotLoaded, FailedUnload],
            FailedUnload => &[],
        }
    }

    /// Move to `to`, or explain why the entry cannot
    pub fn try_transition(self, to: ConfigEntryState) -> Result<ConfigEntryState, InvalidTransition> {
        if self.successors().contains(&to) {
            return Ok(to);
        }

        let reason = match self {
            ConfigEntryState::FailedUnload => "the entry failed to unload and cannot recover",
            ConfigEntryState::SetupInProgress | ConfigEntryState::UnloadInProgress => {
                "the running operation has to finish first"
            }
            ConfigEntryState::Loaded => "a loaded entry has to be unloaded first",
            _ => "setup has not run",
        };
        Err(InvalidTransition {
            from: self,
            to,
            reason,
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            ConfigEntryState::NotLoaded => "not_loaded",
            ConfigEntryState::SetupInProgress => "setup_in_progress",
            ConfigEntryState::Loaded => "loaded",
            ConfigEntryState::SetupError => "setup_error",
            ConfigEntryState::UnloadInProgress => "unload_in_progress",
            ConfigEntryState::FailedUnload => "failed_unload",
        }
    }
}

impl fmt::Display for ConfigEntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
