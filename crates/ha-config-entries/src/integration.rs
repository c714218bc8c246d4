//! What an integration provides to the config entry manager

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, error};

use crate::entry::ConfigEntry;
use crate::flow::FlowHandler;
use crate::manager::ConfigEntries;

/// Why an integration could not set up an entry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// The entry's configuration is wrong and has to be edited
    #[error("{0}")]
    ConfigEntryError(String),

    #[error("{0}")]
    Failed(String),
}

/// Sets up and unloads the config entries of one domain
#[async_trait]
pub trait Integration: Send + Sync {
    fn domain(&self) -> &str;

    async fn setup_entry(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<(), SetupError>;

    /// False when something could not be torn down
    async fn unload_entry(&self, entries: &ConfigEntries, entry: &ConfigEntry) -> bool;

    fn config_flow(&self) -> Option<Box<dyn FlowHandler>> {
        None
    }

    fn options_flow(&self, _entry: &ConfigEntry) -> Option<Box<dyn FlowHandler>> {
        None
    }
}

/// Runs with the updated entry after its title, data or options changed
pub type UpdateListener =
    Arc<dyn for<'a> Fn(&'a ConfigEntries, ConfigEntry) -> BoxFuture<'a, ()> + Send + Sync>;

/// Runs once, the next time the entry unloads or fails to set up
pub type UnloadCallback = Box<dyn FnOnce() + Send + Sync>;

/// [`UpdateListener`] that reloads the updated entry
pub fn reload_on_update(entries: &ConfigEntries, entry: ConfigEntry) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        debug!("Entry {} changed, reloading", entry.entry_id);
        if let Err(err) = entries.reload(&entry.entry_id).await {
            error!("Error reloading entry {}: {}", entry.entry_id, err);
        }
    })
}
