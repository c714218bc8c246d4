//! Devices and the config entries linked to them
//!
//! A device is found again through any of its identifiers or connections.
//! It lives as long as at least one config entry links to it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

pub const STORAGE_KEY: &str = "core.device_registry";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 12;

/// `(integration domain, id)`, e.g. `("mobile_app", "phone1")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        DeviceIdentifier(domain.into(), id.into())
    }
}

/// `(connection type, address)`; the address is lowercased
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceConnection(pub String, pub String);

impl DeviceConnection {
    pub fn new(kind: impl Into<String>, address: impl Into<String>) -> Self {
        DeviceConnection(kind.into(), address.into().to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LookupKey {
    Identifier(DeviceIdentifier),
    Connection(DeviceConnection),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,
    #[serde(default)]
    pub connections: Vec<DeviceConnection>,
    /// Linked config entries, in link order
    #[serde(default)]
    pub config_entries: Vec<String>,
    /// The first linked entry still linked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_config_entry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    fn lookup_keys(&self) -> impl Iterator<Item = LookupKey> + '_ {
        let identifiers = self.identifiers.iter().cloned().map(LookupKey::Identifier);
        let connections = self.connections.iter().cloned().map(LookupKey::Connection);
        identifiers.chain(connections)
    }

    fn link(&mut self, config_entry_id: &str) {
        if !self.config_entries.iter().any(|id| id == config_entry_id) {
            self.config_entries.push(config_entry_id.to_owned());
        }
        self.primary_config_entry
            .get_or_insert_with(|| config_entry_id.to_owned());
    }

    fn unlink(&mut self, config_entry_id: &str) {
        self.config_entries.retain(|id| id != config_entry_id);
        if self.primary_config_entry.as_deref() == Some(config_entry_id) {
            self.primary_config_entry = self.config_entries.first().cloned();
        }
    }
}

fn merge<T: Clone + PartialEq>(into: &mut Vec<T>, items: &[T]) {
    for item in items {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    pub devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

pub struct DeviceRegistry {
    storage: Arc<Storage>,
    devices: DashMap<String, Arc<DeviceEntry>>,
    /// identifier or connection -> device id
    lookup: DashMap<LookupKey, String>,
    by_config_entry: DashMap<String, HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        DeviceRegistry {
            storage,
            devices: DashMap::new(),
            lookup: DashMap::new(),
            by_config_entry: DashMap::new(),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.storage.load_data::<DeviceRegistryData>().await? else {
            return Ok(());
        };
        info!("Restoring {} devices", data.devices.len());
        for device in data.devices {
            self.insert(Arc::new(device));
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let mut devices: Vec<DeviceEntry> = self
            .devices
            .iter()
            .map(|device| DeviceEntry::clone(device.value()))
            .collect();
        devices.sort_by_key(|device| device.created_at);

        let count = devices.len();
        self.storage
            .save_data(&DeviceRegistryData { devices })
            .await?;
        debug!("Stored {} devices", count);
        Ok(())
    }

    fn insert(&self, device: Arc<DeviceEntry>) {
        for key in device.lookup_keys() {
            self.lookup.insert(key, device.id.clone());
        }
        for entry_id in &device.config_entries {
            self.by_config_entry
                .entry(entry_id.clone())
                .or_default()
                .insert(device.id.clone());
        }
        self.devices.insert(device.id.clone(), device);
    }

    fn take(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let (_, device) = self.devices.remove(device_id)?;
        for key in device.lookup_keys() {
            self.lookup.remove(&key);
        }
        for entry_id in &device.config_entries {
            if let Some(mut ids) = self.by_config_entry.get_mut(entry_id) {
                ids.remove(device_id);
            }
        }
        Some(device)
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.devices
            .get(device_id)
            .map(|device| Arc::clone(device.value()))
    }

    /// The device known under any of `identifiers`, else any of `connections`
    pub fn get_device(
        &self,
        identifiers: &[DeviceIdentifier],
        connections: &[DeviceConnection],
    ) -> Option<Arc<DeviceEntry>> {
        let keys = identifiers
            .iter()
            .cloned()
            .map(LookupKey::Identifier)
            .chain(connections.iter().cloned().map(LookupKey::Connection));
        keys.into_iter()
            .find_map(|key| self.lookup.get(&key).map(|id| id.value().clone()))
            .and_then(|device_id| self.get(&device_id))
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        let ids: Vec<String> = match self.by_config_entry.get(config_entry_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Link `config_entry_id` to the matching device, creating it if needed
    ///
    /// Identifiers and connections the device did not have yet are added to
    /// it.
    pub fn get_or_create(
        &self,
        config_entry_id: &str,
        identifiers: &[DeviceIdentifier],
        connections: &[DeviceConnection],
        name: Option<&str>,
    ) -> Arc<DeviceEntry> {
        if let Some(existing) = self.get_device(identifiers, connections) {
            return self
                .update(&existing.id, |device| {
                    device.link(config_entry_id);
                    merge(&mut device.identifiers, identifiers);
                    merge(&mut device.connections, connections);
                })
                .unwrap_or(existing);
        }

        let now = Utc::now();
        let mut device = DeviceEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identifiers: identifiers.to_vec(),
            connections: connections.to_vec(),
            config_entries: Vec::new(),
            primary_config_entry: None,
            name: name.map(str::to_owned),
            created_at: now,
            modified_at: now,
        };
        device.link(config_entry_id);

        let device = Arc::new(device);
        self.insert(Arc::clone(&device));
        info!("Registered device {} for entry {}", device.id, config_entry_id);
        device
    }

    /// Apply `f` to a copy of the device and store it in place of the old one
    pub fn update(
        &self,
        device_id: &str,
        f: impl FnOnce(&mut DeviceEntry),
    ) -> Option<Arc<DeviceEntry>> {
        let mut device = DeviceEntry::clone(&*self.take(device_id)?);
        f(&mut device);
        device.modified_at = Utc::now();

        let device = Arc::new(device);
        self.insert(Arc::clone(&device));
        Some(device)
    }

    /// Unlink a config entry; the device is removed with its last link and
    /// `None` is returned
    pub fn remove_config_entry(
        &self,
        device_id: &str,
        config_entry_id: &str,
    ) -> Option<Arc<DeviceEntry>> {
        let device = self.get(device_id)?;
        if device.config_entries.iter().all(|id| id == config_entry_id) {
            self.remove(device_id);
            return None;
        }
        self.update(device_id, |device| device.unlink(config_entry_id))
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let device = self.take(device_id)?;
        info!("Removed device {}", device_id);
        Some(device)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
