//! Attribute as Sensor
//!
//! Exposes one attribute of an existing entity as a sensor of its own,
//! optionally rendered through a value template. Entries are created by a
//! two-step config flow and edited by an options flow; editing the options
//! reloads the entry.

pub mod config_flow;
pub mod r#const;
pub mod sensor;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use ha_config_entries::{
    reload_on_update, ConfigEntries, ConfigEntry, FlowHandler, Integration, SetupError,
};
use ha_registries::device::remove_stale_devices_links_keep_entity_device;
use ha_registries::EntityRegistryError;
use ha_template::{Template, TemplateError};

use crate::entity::EntityError;
use crate::hass::HassCore;
use crate::sensor::{SensorDeviceClass, SensorStateClass};

pub use self::r#const::DOMAIN;
pub use self::sensor::AttributeSensor;

/// Errors raised while setting up or running an attribute sensor
#[derive(Debug, Error)]
pub enum AttributeSensorError {
    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] serde_json::Error),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Registry(#[from] EntityRegistryError),

    #[error(transparent)]
    Entity(#[from] EntityError),
}

impl From<AttributeSensorError> for SetupError {
    fn from(err: AttributeSensorError) -> Self {
        match err {
            AttributeSensorError::Entity(EntityError::Storage(_)) => {
                SetupError::Failed(err.to_string())
            }
            _ => SetupError::ConfigEntryError(err.to_string()),
        }
    }
}

/// Options of an attribute sensor entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSensorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Source entity id, or the registry id of the source entity
    pub entity_id: String,

    pub attribute: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<SensorDeviceClass>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_class: Option<SensorStateClass>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
}

impl AttributeSensorConfig {
    pub fn from_options(options: &HashMap<String, Value>) -> Result<Self, AttributeSensorError> {
        let record = options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<_, _>>();
        Ok(serde_json::from_value(Value::Object(record))?)
    }

    /// The value template, if one is configured
    pub fn value_template(&self) -> Option<&str> {
        self.value_template.as_deref().filter(|t| !t.is_empty())
    }
}

/// The attribute_as_sensor integration
pub struct AttributeAsSensor {
    core: HassCore,
}

impl AttributeAsSensor {
    pub fn new(core: HassCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Integration for AttributeAsSensor {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn setup_entry(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<(), SetupError> {
        let config = AttributeSensorConfig::from_options(&entry.options)?;
        let registries = &self.core.registries;

        remove_stale_devices_links_keep_entity_device(
            &registries.entities,
            &registries.devices,
            &entry.entry_id,
            &config.entity_id,
        )
        .map_err(AttributeSensorError::from)?;

        if let Some(source) = config.value_template() {
            Template::new(source, self.core.templates.clone())
                .ensure_valid()
                .map_err(AttributeSensorError::from)?;
        }

        debug!("Forwarding {} to the sensor platform", entry.entry_id);
        sensor::setup_entry(&self.core, entry, &config).await?;

        let remove_listener = entries.add_update_listener(&entry.entry_id, Arc::new(reload_on_update));
        entries.on_unload(&entry.entry_id, remove_listener);

        Ok(())
    }

    async fn unload_entry(&self, _entries: &ConfigEntries, entry: &ConfigEntry) -> bool {
        self.core.entity_platform.remove_entities(&entry.entry_id)
    }

    fn config_flow(&self) -> Option<Box<dyn FlowHandler>> {
        Some(Box::new(config_flow::config_flow(self.core.states.clone())))
    }

    fn options_flow(&self, entry: &ConfigEntry) -> Option<Box<dyn FlowHandler>> {
        Some(Box::new(config_flow::options_flow(
            self.core.states.clone(),
            entry,
        )))
    }
}
