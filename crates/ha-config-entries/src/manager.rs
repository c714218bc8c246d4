//! The config entry manager
//!
//! Owns every config entry, persists them to `core.config_entries` and runs
//! setup, unload and reload through the integration of the entry's domain.
//! Lifecycle operations are serialized by one lock; a reload holds it for
//! the unload and the setup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use ha_registries::{Registries, Storable, Storage, StorageError, StorageResult};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::integration::{Integration, UnloadCallback, UpdateListener};
use crate::state_machine::InvalidTransition;

pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Unknown config entry {0}")]
    NotFound(String),

    #[error("Config entry in state {0} cannot be unloaded")]
    CannotUnload(ConfigEntryState),

    #[error("No integration registered for {0}")]
    IntegrationNotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Callbacks attached to one entry
#[derive(Default)]
struct Hooks {
    update_listeners: Vec<(u64, UpdateListener)>,
    on_unload: Vec<UnloadCallback>,
}

pub struct ConfigEntries {
    pub registries: Arc<Registries>,
    storage: Arc<Storage>,
    entries: DashMap<String, ConfigEntry>,
    integrations: DashMap<String, Arc<dyn Integration>>,
    hooks: Arc<DashMap<String, Hooks>>,
    next_listener: AtomicU64,
    lifecycle: Mutex<()>,
}

impl ConfigEntries {
    /// Entries are stored next to the registries
    pub fn new(registries: Arc<Registries>) -> Self {
        ConfigEntries {
            storage: Arc::clone(&registries.storage),
            registries,
            entries: DashMap::new(),
            integrations: DashMap::new(),
            hooks: Arc::new(DashMap::new()),
            next_listener: AtomicU64::new(0),
            lifecycle: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.storage.load_data::<ConfigEntriesData>().await? else {
            return Ok(());
        };
        info!("Restoring {} config entries", data.entries.len());
        for entry in data.entries {
            self.entries.insert(entry.entry_id.clone(), entry);
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let mut entries: Vec<ConfigEntry> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by_key(|entry| entry.created_at);

        let count = entries.len();
        self.storage.save_data(&ConfigEntriesData { entries }).await?;
        debug!("Stored {} config entries", count);
        Ok(())
    }

    fn not_found(entry_id: &str) -> ConfigEntriesError {
        ConfigEntriesError::NotFound(entry_id.to_owned())
    }

    fn require(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        self.get(entry_id).ok_or_else(|| Self::not_found(entry_id))
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|entry| entry.value().clone())
    }

    /// Store a new entry; it is not set up
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        self.entries.insert(entry.entry_id.clone(), entry.clone());
        self.save().await?;
        info!("Added {} entry '{}' ({})", entry.domain, entry.title, entry.entry_id);
        Ok(entry)
    }

    /// Apply `update`; when anything changed the entry is saved and its
    /// update listeners have run by the time this returns
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let (after, changed) = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| Self::not_found(entry_id))?;
            let changed = update.apply(&mut entry);
            (entry.clone(), changed)
        };
        if !changed {
            return Ok(after);
        }
        self.save().await?;
        debug!("Entry {} updated", entry_id);

        let listeners: Vec<UpdateListener> = self
            .hooks
            .get(entry_id)
            .map(|hooks| {
                hooks
                    .update_listeners
                    .iter()
                    .map(|(_, listener)| Arc::clone(listener))
                    .collect()
            })
            .unwrap_or_default();
        for listener in listeners {
            listener(self, after.clone()).await;
        }

        Ok(self.get(entry_id).unwrap_or(after))
    }

    /// Unload and delete an entry
    ///
    /// Its registered entities are deleted and its device links dropped.
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        {
            let _guard = self.lifecycle.lock().await;
            self.unload_locked(entry_id).await?;
        }
        let entry = self.require(entry_id)?;

        let registries = &self.registries;
        for entity in registries.entities.get_by_config_entry_id(entry_id) {
            registries.entities.remove(&entity.entity_id);
        }
        for device in registries.devices.get_by_config_entry_id(entry_id) {
            registries.devices.remove_config_entry(&device.id, entry_id);
        }
        registries.save_all().await?;

        self.hooks.remove(entry_id);
        self.entries.remove(entry_id);
        self.save().await?;

        info!("Removed {} entry '{}' ({})", entry.domain, entry.title, entry_id);
        Ok(entry)
    }

    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        self.entries
            .get_mut(entry_id)
            .ok_or_else(|| Self::not_found(entry_id))?
            .try_set_state(state, reason)?;
        debug!("Entry {} is now {}", entry_id, state);
        Ok(())
    }

    pub fn register_integration(&self, integration: Arc<dyn Integration>) {
        let domain = integration.domain().to_owned();
        debug!("Integration {} registered", domain);
        self.integrations.insert(domain, integration);
    }

    pub fn integration(&self, domain: &str) -> Option<Arc<dyn Integration>> {
        self.integrations
            .get(domain)
            .map(|integration| Arc::clone(integration.value()))
    }

    /// Attach `listener` to the entry
    ///
    /// The returned callback detaches it again and is meant to be passed to
    /// [`ConfigEntries::on_unload`].
    pub fn add_update_listener(&self, entry_id: &str, listener: UpdateListener) -> UnloadCallback {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.hooks
            .entry(entry_id.to_owned())
            .or_default()
            .update_listeners
            .push((id, listener));

        let hooks = Arc::clone(&self.hooks);
        let entry_id = entry_id.to_owned();
        Box::new(move || {
            if let Some(mut hooks) = hooks.get_mut(&entry_id) {
                hooks.update_listeners.retain(|(other, _)| *other != id);
            }
        })
    }

    pub fn update_listener_count(&self, entry_id: &str) -> usize {
        self.hooks
            .get(entry_id)
            .map_or(0, |hooks| hooks.update_listeners.len())
    }

    pub fn on_unload(&self, entry_id: &str, callback: UnloadCallback) {
        self.hooks
            .entry(entry_id.to_owned())
            .or_default()
            .on_unload
            .push(callback);
    }

    fn run_on_unload(&self, entry_id: &str) {
        let callbacks = match self.hooks.get_mut(entry_id) {
            Some(mut hooks) => std::mem::take(&mut hooks.on_unload),
            None => return,
        };
        if !callbacks.is_empty() {
            debug!("{} unload callbacks for {}", callbacks.len(), entry_id);
        }
        for callback in callbacks {
            callback();
        }
    }

    /// Set up an entry; true when it ends up loaded
    ///
    /// An integration failure is not an error here. It is recorded as the
    /// entry's state and reason.
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        let _guard = self.lifecycle.lock().await;
        self.setup_locked(entry_id).await
    }

    async fn setup_locked(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        let entry = self.require(entry_id)?;
        self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(integration) = self.integration(&entry.domain) else {
            let err = ConfigEntriesError::IntegrationNotFound(entry.domain.clone());
            self.transition(entry_id, ConfigEntryState::SetupError, Some(err.to_string()))?;
            return Err(err);
        };

        let err = match integration.setup_entry(self, &entry).await {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Set up {} entry '{}'", entry.domain, entry.title);
                return Ok(true);
            }
            Err(err) => err,
        };

        error!(
            "Error setting up {} entry '{}': {}",
            entry.domain, entry.title, err
        );
        self.run_on_unload(entry_id);
        self.transition(entry_id, ConfigEntryState::SetupError, Some(err.to_string()))?;
        Ok(false)
    }

    /// Unload an entry; false when its integration could not unload it
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(entry_id).await
    }

    async fn unload_locked(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        let entry = self.require(entry_id)?;
        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(true);
        }
        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }

        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        // Only a loaded entry has anything for the integration to tear down
        let unloaded = match self.integration(&entry.domain) {
            Some(integration) if entry.is_loaded() => {
                integration.unload_entry(self, &entry).await
            }
            _ => true,
        };

        if !unloaded {
            self.transition(
                entry_id,
                ConfigEntryState::FailedUnload,
                Some("Integration failed to unload the entry".to_owned()),
            )?;
            warn!("Could not unload {} entry '{}'", entry.domain, entry.title);
            return Ok(false);
        }

        self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
        self.run_on_unload(entry_id);
        info!("Unloaded {} entry '{}'", entry.domain, entry.title);
        Ok(true)
    }

    /// Unload then set up again, as one lifecycle operation
    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        let _guard = self.lifecycle.lock().await;
        if !self.unload_locked(entry_id).await? {
            return Ok(false);
        }
        self.setup_locked(entry_id).await
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set up every stored entry, one after the other
    pub async fn setup_all(&self) -> HashMap<String, ConfigEntriesResult<bool>> {
        let mut results = HashMap::new();
        for entry_id in self.entry_ids() {
            let result = self.setup(&entry_id).await;
            results.insert(entry_id, result);
        }
        results
    }
}
