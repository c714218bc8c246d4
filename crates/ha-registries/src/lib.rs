//! Entity and device registries
//!
//! Both registries are kept in memory and written to `.storage/` as
//! versioned JSON documents. [`device`] holds the helpers that attach a
//! derived entity to the device of the entity it was made from.

pub mod storage;

pub mod device;
pub mod device_registry;
pub mod entity_registry;

pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

pub use entity_registry::{
    EntityEntry, EntityRegistration, EntityRegistry, EntityRegistryData,
    EntityRegistryError,
};

pub use device_registry::{
    DeviceConnection, DeviceEntry, DeviceIdentifier, DeviceRegistry, DeviceRegistryData,
};

pub use device::DeviceInfo;

use std::sync::Arc;

/// The registries of one config directory, sharing its storage
pub struct Registries {
    pub storage: Arc<Storage>,
    pub entities: EntityRegistry,
    pub devices: DeviceRegistry,
}

impl Registries {
    pub fn new(config_dir: impl AsRef<std::path::Path>) -> Self {
        let storage = Arc::new(Storage::new(config_dir));

        Self {
            entities: EntityRegistry::new(storage.clone()),
            devices: DeviceRegistry::new(storage.clone()),
            storage,
        }
    }

    pub async fn load_all(&self) -> StorageResult<()> {
        self.entities.load().await?;
        self.devices.load().await?;
        Ok(())
    }

    pub async fn save_all(&self) -> StorageResult<()> {
        self.entities.save().await?;
        self.devices.save().await?;
        Ok(())
    }
}
