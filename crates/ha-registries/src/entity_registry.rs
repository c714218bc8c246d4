//! Registered entities
//!
//! An entity registered with a unique id keeps its entity id for as long as
//! the registry entry exists, across reloads and restarts. The registry id
//! (`EntityEntry::id`) stays stable even if the entity id changes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityRegistryError {
    #[error("Entity {0} is not registered")]
    NotFound(String),

    /// Neither a valid entity id nor the id of a registry entry
    #[error("Unknown entity registry entry {0}")]
    UnknownEntry(String),
}

pub const STORAGE_KEY: &str = "core.entity_registry";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 19;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    pub id: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Integration that provides the entity
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,
    /// Name, icon and device class as last reported by the integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(domain, _)| domain)
    }

    fn unique_key(&self) -> Option<UniqueKey> {
        let unique_id = self.unique_id.clone()?;
        Some((self.domain().to_owned(), self.platform.clone(), unique_id))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    pub entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// What an integration knows about an entity it is adding
#[derive(Debug, Clone, Default)]
pub struct EntityRegistration<'a> {
    pub domain: &'a str,
    pub platform: &'a str,
    pub unique_id: &'a str,
    /// Object id tried first for a new entity id
    pub suggested_object_id: &'a str,
    pub config_entry_id: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub original_name: Option<&'a str>,
    pub original_icon: Option<&'a str>,
    pub original_device_class: Option<&'a str>,
    pub unit_of_measurement: Option<&'a str>,
}

impl EntityRegistration<'_> {
    fn write_into(&self, entry: &mut EntityEntry) {
        let owned = |value: Option<&str>| value.map(str::to_owned);
        entry.config_entry_id = owned(self.config_entry_id);
        entry.device_id = owned(self.device_id);
        entry.original_name = owned(self.original_name);
        entry.original_icon = owned(self.original_icon);
        entry.original_device_class = owned(self.original_device_class);
        entry.unit_of_measurement = owned(self.unit_of_measurement);
    }
}

/// `(domain, platform, unique_id)`
type UniqueKey = (String, String, String);

#[derive(Default)]
struct Index {
    /// entity id -> entry, in registration order
    entries: IndexMap<String, Arc<EntityEntry>>,
    by_registry_id: HashMap<String, String>,
    by_unique_key: HashMap<UniqueKey, String>,
    by_config_entry: HashMap<String, HashSet<String>>,
}

impl Index {
    fn insert(&mut self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();
        self.by_registry_id.insert(entry.id.clone(), entity_id.clone());
        if let Some(key) = entry.unique_key() {
            self.by_unique_key.insert(key, entity_id.clone());
        }
        if let Some(config_entry_id) = &entry.config_entry_id {
            self.by_config_entry
                .entry(config_entry_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }
        self.entries.insert(entity_id, entry);
    }

    fn remove(&mut self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self.entries.shift_remove(entity_id)?;
        self.by_registry_id.remove(&entry.id);
        if let Some(key) = entry.unique_key() {
            self.by_unique_key.remove(&key);
        }
        let linked = entry
            .config_entry_id
            .as_ref()
            .and_then(|config_entry_id| self.by_config_entry.get_mut(config_entry_id));
        if let Some(ids) = linked {
            ids.remove(entity_id);
        }
        Some(entry)
    }

    fn linked(&self, index: &HashMap<String, HashSet<String>>, key: &str) -> Vec<Arc<EntityEntry>> {
        index
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|entity_id| self.entries.get(entity_id).cloned())
            .collect()
    }
}

pub struct EntityRegistry {
    storage: Arc<Storage>,
    index: RwLock<Index>,
}

impl EntityRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        EntityRegistry {
            storage,
            index: RwLock::default(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.storage.load_data::<EntityRegistryData>().await? else {
            return Ok(());
        };
        info!("Restoring {} registered entities", data.entities.len());
        let mut index = self.write();
        for entry in data.entities {
            index.insert(Arc::new(entry));
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let entities: Vec<EntityEntry> = self
            .iter()
            .into_iter()
            .map(|entry| EntityEntry::clone(&entry))
            .collect();
        let count = entities.len();
        self.storage
            .save_data(&EntityRegistryData { entities })
            .await?;
        debug!("Stored {} registered entities", count);
        Ok(())
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.read().entries.get(entity_id).cloned()
    }

    /// Look up by registry id
    pub fn get_by_id(&self, id: &str) -> Option<Arc<EntityEntry>> {
        let index = self.read();
        let entity_id = index.by_registry_id.get(id)?;
        index.entries.get(entity_id).cloned()
    }

    pub fn get_entity_id(&self, domain: &str, platform: &str, unique_id: &str) -> Option<String> {
        let key = (domain.to_owned(), platform.to_owned(), unique_id.to_owned());
        self.read().by_unique_key.get(&key).cloned()
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        let index = self.read();
        index.linked(&index.by_config_entry, config_entry_id)
    }

    /// Turn an entity id or registry id into an entity id
    ///
    /// A well-formed entity id is accepted whether or not it is registered.
    pub fn validate_entity_id(&self, entity_id_or_uuid: &str) -> Result<String, EntityRegistryError> {
        if ha_core::valid_entity_id(entity_id_or_uuid) {
            return Ok(entity_id_or_uuid.to_owned());
        }
        self.get_by_id(entity_id_or_uuid)
            .map(|entry| entry.entity_id.clone())
            .ok_or_else(|| EntityRegistryError::UnknownEntry(entity_id_or_uuid.to_owned()))
    }

    /// Register an entity, or refresh the entry already registered under the
    /// same `(domain, platform, unique_id)`
    ///
    /// A refreshed entry keeps its entity id. A new one gets
    /// `<domain>.<suggested_object_id>`, suffixed with `_2`, `_3`, ... when
    /// that id is registered or listed in `reserved_ids`.
    pub fn get_or_create(
        &self,
        registration: EntityRegistration<'_>,
        reserved_ids: &[String],
    ) -> Arc<EntityEntry> {
        let known = self.get_entity_id(
            registration.domain,
            registration.platform,
            registration.unique_id,
        );
        if let Some(entity_id) = known {
            let refreshed = self.update(&entity_id, |entry| {
                registration.write_into(entry);
                entry.modified_at = Utc::now();
            });
            if let Ok(entry) = refreshed {
                debug!("Entity {} already registered", entry.entity_id);
                return entry;
            }
        }

        let entity_id = self.generate_entity_id(
            registration.domain,
            registration.suggested_object_id,
            reserved_ids,
        );
        let now = Utc::now();
        let mut entry = EntityEntry {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id,
            unique_id: Some(registration.unique_id.to_owned()),
            platform: registration.platform.to_owned(),
            device_id: None,
            config_entry_id: None,
            original_name: None,
            original_icon: None,
            original_device_class: None,
            unit_of_measurement: None,
            created_at: now,
            modified_at: now,
        };
        registration.write_into(&mut entry);

        let entry = Arc::new(entry);
        self.write().insert(Arc::clone(&entry));
        info!("Registered {}", entry.entity_id);
        entry
    }

    /// Apply `f` to a copy of the entry and store it in place of the old one
    pub fn update(
        &self,
        entity_id: &str,
        f: impl FnOnce(&mut EntityEntry),
    ) -> Result<Arc<EntityEntry>, EntityRegistryError> {
        let mut index = self.write();
        let mut entry = index
            .remove(entity_id)
            .map(|entry| EntityEntry::clone(&entry))
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_owned()))?;
        f(&mut entry);

        let entry = Arc::new(entry);
        index.insert(Arc::clone(&entry));
        Ok(entry)
    }

    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self.write().remove(entity_id)?;
        info!("Removed {} from the entity registry", entity_id);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn is_registered(&self, entity_id: &str) -> bool {
        self.read().entries.contains_key(entity_id)
    }

    /// First free id among `<domain>.<object_id>`, `<domain>.<object_id>_2`, ...
    pub fn generate_entity_id(
        &self,
        domain: &str,
        suggested_object_id: &str,
        reserved_ids: &[String],
    ) -> String {
        let base = format!("{}.{}", domain, suggested_object_id);
        let index = self.read();
        let free = |candidate: &String| {
            !index.entries.contains_key(candidate) && !reserved_ids.contains(candidate)
        };

        let found = std::iter::once(base.clone())
            .chain((2..).map(|n| format!("{}_{}", base, n)))
            .find(free);
        found.unwrap_or(base)
    }

    /// Snapshot of all entries in registration order
    pub fn iter(&self) -> Vec<Arc<EntityEntry>> {
        self.read().entries.values().cloned().collect()
    }
}
