//! The Home Assistant instance
//!
//! [`HassCore`] bundles the services entities and integrations use.
//! [`HomeAssistant`] adds the config entry manager and the flow manager on
//! top and owns the registered integrations.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use ha_config_entries::{ConfigEntries, FlowManager};
use ha_event_bus::EventBus;
use ha_registries::{Registries, StorageResult};
use ha_state_store::StateStore;
use ha_template::TemplateEngine;

use crate::attribute_as_sensor::AttributeAsSensor;
use crate::entity::EntityPlatform;

/// Services shared by integrations and their entities
#[derive(Clone)]
pub struct HassCore {
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// Entity states
    pub states: Arc<StateStore>,
    pub templates: Arc<TemplateEngine>,
    /// Entity and device registries persisted under `.storage/`
    pub registries: Arc<Registries>,
    pub entity_platform: Arc<EntityPlatform>,
}

impl HassCore {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        let templates = Arc::new(TemplateEngine::new(states.clone()));
        let registries = Arc::new(Registries::new(config_dir));
        let entity_platform = Arc::new(EntityPlatform::new(states.clone(), registries.clone()));

        Self {
            bus,
            states,
            templates,
            registries,
            entity_platform,
        }
    }
}

/// The central Home Assistant instance
pub struct HomeAssistant {
    core: HassCore,
    pub config_entries: Arc<ConfigEntries>,
    pub flows: FlowManager,
}

impl HomeAssistant {
    /// Create an instance persisting to `config_dir` with the built-in
    /// integrations registered
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        let core = HassCore::new(config_dir);
        let config_entries = Arc::new(ConfigEntries::new(core.registries.clone()));
        config_entries.register_integration(Arc::new(AttributeAsSensor::new(core.clone())));
        let flows = FlowManager::new(config_entries.clone());

        Self {
            core,
            config_entries,
            flows,
        }
    }

    pub fn core(&self) -> &HassCore {
        &self.core
    }

    /// Load registries and config entries, then set up every entry
    ///
    /// Entries failing setup keep their error state and reason; only
    /// storage failures are returned.
    pub async fn start(&self) -> StorageResult<()> {
        info!("Starting Home Assistant");
        self.registries.load_all().await?;
        self.config_entries.load().await?;

        for (entry_id, result) in self.config_entries.setup_all().await {
            if let Err(err) = result {
                warn!("Error setting up config entry {}: {}", entry_id, err);
            }
        }
        Ok(())
    }

    /// Unload every entry and persist the registries and config entries
    pub async fn stop(&self) -> StorageResult<()> {
        info!("Stopping Home Assistant");
        for entry_id in self.config_entries.entry_ids() {
            if let Err(err) = self.config_entries.unload(&entry_id).await {
                warn!("Error unloading config entry {}: {}", entry_id, err);
            }
        }

        self.config_entries.save().await?;
        self.registries.save_all().await?;
        Ok(())
    }
}

impl Deref for HomeAssistant {
    type Target = HassCore;

    fn deref(&self) -> &HassCore {
        &self.core
    }
}
