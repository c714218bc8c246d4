//! Entities and the entity platform
//!
//! The platform registers entities added by a config entry in the entity
//! registry, links them to their device, assigns entity ids and attaches
//! them. Unloading the entry detaches the entities and removes their states.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use ha_core::attrs::{
    ATTR_DEVICE_CLASS, ATTR_FRIENDLY_NAME, ATTR_ICON, ATTR_STATE_CLASS, ATTR_UNIT_OF_MEASUREMENT,
};
use ha_core::{Context, EntityId, EntityIdError};
use ha_registries::{DeviceInfo, EntityRegistration, Registries, StorageError};
use ha_state_store::StateStore;

/// Entity platform errors
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("Invalid entity id: {0}")]
    EntityId(#[from] EntityIdError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Registry and display metadata of an entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDescription {
    pub unique_id: Option<String>,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub device_class: Option<String>,
    pub state_class: Option<String>,
    pub unit_of_measurement: Option<String>,
    /// Device the entity is attached to
    pub device_info: Option<DeviceInfo>,
}

impl EntityDescription {
    /// Attributes every state written by the entity carries
    pub fn state_attributes(&self) -> HashMap<String, Value> {
        let mut attributes = HashMap::new();
        let fields = [
            (ATTR_FRIENDLY_NAME, &self.name),
            (ATTR_ICON, &self.icon),
            (ATTR_DEVICE_CLASS, &self.device_class),
            (ATTR_STATE_CLASS, &self.state_class),
            (ATTR_UNIT_OF_MEASUREMENT, &self.unit_of_measurement),
        ];
        for (key, value) in fields {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                attributes.insert(key.to_string(), json!(value));
            }
        }
        attributes
    }

    fn suggested_object_id(&self, platform: &str) -> String {
        let source = match (self.name.as_deref(), self.unique_id.as_deref()) {
            (Some(name), _) if !name.is_empty() => name.to_string(),
            (_, Some(unique_id)) => format!("{} {}", platform, unique_id),
            _ => platform.to_string(),
        };
        slug::slugify(source).replace('-', "_")
    }
}

/// An entity managed by the [`EntityPlatform`]
pub trait Entity: Send + Sync {
    fn description(&self) -> &EntityDescription;

    /// Called once the entity has its entity id; the entity starts
    /// listening and writes its first state
    fn added_to_hass(&self, entity_id: EntityId);

    /// Called before the entity's state is removed; listeners must be
    /// cancelled here
    fn will_remove_from_hass(&self);
}

struct PlatformEntity {
    entity_id: EntityId,
    entity: Arc<dyn Entity>,
}

/// Adds and removes the entities of config entries
pub struct EntityPlatform {
    states: Arc<StateStore>,
    registries: Arc<Registries>,
    /// Entities by config entry id
    entities: DashMap<String, Vec<PlatformEntity>>,
}

impl EntityPlatform {
    pub fn new(states: Arc<StateStore>, registries: Arc<Registries>) -> Self {
        Self {
            states,
            registries,
            entities: DashMap::new(),
        }
    }

    /// Add the entities of a config entry to `domain` on behalf of `platform`
    ///
    /// Entities with a unique id are registered in the entity registry,
    /// which keeps their entity id stable across reloads. Device info links
    /// the config entry to that device.
    ///
    /// Nothing is attached unless the registries were stored.
    pub async fn add_entities(
        &self,
        domain: &str,
        platform: &str,
        config_entry_id: &str,
        entities: Vec<Arc<dyn Entity>>,
    ) -> Result<Vec<EntityId>, EntityError> {
        let mut registered = Vec::with_capacity(entities.len());
        for entity in entities {
            let entity_id = self.register(domain, platform, config_entry_id, entity.as_ref())?;
            registered.push(PlatformEntity { entity_id, entity });
        }

        self.registries.save_all().await?;

        let mut added = Vec::with_capacity(registered.len());
        for PlatformEntity { entity_id, entity } in registered {
            info!("Adding {} entity {}", platform, entity_id);
            entity.added_to_hass(entity_id.clone());

            added.push(entity_id.clone());
            self.entities
                .entry(config_entry_id.to_string())
                .or_default()
                .push(PlatformEntity { entity_id, entity });
        }
        Ok(added)
    }

    fn register(
        &self,
        domain: &str,
        platform: &str,
        config_entry_id: &str,
        entity: &dyn Entity,
    ) -> Result<EntityId, EntityError> {
        let description = entity.description();
        let suggested_object_id = description.suggested_object_id(platform);
        let reserved = self.states.entity_ids(domain);

        let device_id = description.device_info.as_ref().map(|info| {
            self.registries
                .devices
                .get_or_create(config_entry_id, &info.identifiers, &info.connections, None)
                .id
                .clone()
        });

        let entity_id = match description.unique_id.as_deref() {
            Some(unique_id) => {
                let entry = self.registries.entities.get_or_create(
                    EntityRegistration {
                        domain,
                        platform,
                        unique_id,
                        suggested_object_id: &suggested_object_id,
                        config_entry_id: Some(config_entry_id),
                        device_id: device_id.as_deref(),
                        original_name: description.name.as_deref(),
                        original_icon: description.icon.as_deref(),
                        original_device_class: description.device_class.as_deref(),
                        unit_of_measurement: description.unit_of_measurement.as_deref(),
                    },
                    &reserved,
                );
                entry.entity_id.clone()
            }
            None => self.registries.entities.generate_entity_id(
                domain,
                &suggested_object_id,
                &reserved,
            ),
        };

        Ok(entity_id.parse()?)
    }

    /// Detach the entities of a config entry and remove their states
    ///
    /// Registry entries are kept so the entity ids survive a reload.
    pub fn remove_entities(&self, config_entry_id: &str) -> bool {
        let Some((_, removed)) = self.entities.remove(config_entry_id) else {
            debug!("No entities to remove for {}", config_entry_id);
            return true;
        };

        for PlatformEntity { entity_id, entity } in removed {
            entity.will_remove_from_hass();
            self.states.remove(&entity_id, Context::new());
            info!("Removed entity {}", entity_id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_event_bus::EventBus;
    use ha_registries::DeviceIdentifier;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct StaticEntity {
        description: EntityDescription,
        states: Option<Arc<StateStore>>,
        events: Mutex<Vec<String>>,
    }

    impl Entity for StaticEntity {
        fn description(&self) -> &EntityDescription {
            &self.description
        }

        fn added_to_hass(&self, entity_id: EntityId) {
            self.events.lock().unwrap().push(format!("added {}", entity_id));
            if let Some(states) = &self.states {
                states.set(
                    entity_id,
                    "on",
                    self.description.state_attributes(),
                    Context::new(),
                );
            }
        }

        fn will_remove_from_hass(&self) {
            self.events.lock().unwrap().push("removed".to_string());
        }
    }

    fn platform() -> (TempDir, Arc<StateStore>, Arc<Registries>, EntityPlatform) {
        let dir = TempDir::new().unwrap();
        let states = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        let registries = Arc::new(Registries::new(dir.path()));
        let platform = EntityPlatform::new(states.clone(), registries.clone());
        (dir, states, registries, platform)
    }

    #[test]
    fn test_state_attributes() {
        let description = EntityDescription {
            name: Some("Phone battery".to_string()),
            icon: Some("mdi:battery".to_string()),
            unit_of_measurement: Some(String::new()),
            ..Default::default()
        };
        let attributes = description.state_attributes();
        assert_eq!(attributes[ATTR_FRIENDLY_NAME], "Phone battery");
        assert_eq!(attributes[ATTR_ICON], "mdi:battery");
        assert!(!attributes.contains_key(ATTR_UNIT_OF_MEASUREMENT));
        assert!(!attributes.contains_key(ATTR_DEVICE_CLASS));
    }

    #[tokio::test]
    async fn test_add_and_remove_entities() {
        let (_dir, states, registries, platform) = platform();
        let entity = Arc::new(StaticEntity {
            description: EntityDescription {
                unique_id: Some("entry1".to_string()),
                name: Some("Phone Battery".to_string()),
                ..Default::default()
            },
            states: Some(states.clone()),
            ..Default::default()
        });

        let ids = platform
            .add_entities("sensor", "demo", "entry1", vec![entity.clone() as Arc<dyn Entity>])
            .await
            .unwrap();
        assert_eq!(ids[0].to_string(), "sensor.phone_battery");
        assert!(states.contains("sensor.phone_battery"));
        assert!(registries.entities.is_registered("sensor.phone_battery"));

        assert!(platform.remove_entities("entry1"));
        assert!(!states.contains("sensor.phone_battery"));
        // The registry entry survives so the id is stable
        assert!(registries.entities.is_registered("sensor.phone_battery"));
        assert_eq!(
            *entity.events.lock().unwrap(),
            vec!["added sensor.phone_battery".to_string(), "removed".to_string()]
        );

        // Re-adding reuses the registered id
        let ids = platform
            .add_entities("sensor", "demo", "entry1", vec![entity as Arc<dyn Entity>])
            .await
            .unwrap();
        assert_eq!(ids[0].to_string(), "sensor.phone_battery");
    }

    #[tokio::test]
    async fn test_entity_ids_are_deduplicated() {
        let (_dir, states, _registries, platform) = platform();
        states.set(
            "sensor.phone".parse().unwrap(),
            "1",
            HashMap::new(),
            Context::new(),
        );

        let entity = Arc::new(StaticEntity {
            description: EntityDescription {
                unique_id: Some("entry1".to_string()),
                name: Some("Phone".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let ids = platform
            .add_entities("sensor", "demo", "entry1", vec![entity as Arc<dyn Entity>])
            .await
            .unwrap();
        assert_eq!(ids[0].to_string(), "sensor.phone_2");
    }

    #[tokio::test]
    async fn test_nothing_attached_when_registries_cannot_be_stored() {
        let (_dir, states, registries, platform) = platform();
        std::fs::create_dir_all(registries.storage.path("core.entity_registry.tmp")).unwrap();

        let entity = Arc::new(StaticEntity {
            description: EntityDescription {
                unique_id: Some("entry1".to_string()),
                name: Some("Phone Battery".to_string()),
                ..Default::default()
            },
            states: Some(states.clone()),
            ..Default::default()
        });
        let result = platform
            .add_entities("sensor", "demo", "entry1", vec![entity.clone() as Arc<dyn Entity>])
            .await;

        assert!(matches!(result, Err(EntityError::Storage(_))));
        assert!(entity.events.lock().unwrap().is_empty());
        assert!(!states.contains("sensor.phone_battery"));
        assert!(platform.remove_entities("entry1"));
        assert!(entity.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_link() {
        let (_dir, _states, registries, platform) = platform();
        let identifiers = vec![DeviceIdentifier::new("mobile_app", "phone1")];
        let source_device = registries
            .devices
            .get_or_create("source_entry", &identifiers, &[], Some("Phone"));

        let entity = Arc::new(StaticEntity {
            description: EntityDescription {
                unique_id: Some("entry1".to_string()),
                name: Some("Battery".to_string()),
                device_info: Some(DeviceInfo {
                    identifiers,
                    connections: vec![],
                }),
                ..Default::default()
            },
            ..Default::default()
        });
        platform
            .add_entities("sensor", "demo", "entry1", vec![entity as Arc<dyn Entity>])
            .await
            .unwrap();

        let device = registries.devices.get(&source_device.id).unwrap();
        assert!(device.config_entries.contains(&"entry1".to_string()));
        let entry = registries.entities.get("sensor.battery").unwrap();
        assert_eq!(entry.device_id.as_deref(), Some(source_device.id.as_str()));
    }

    #[tokio::test]
    async fn test_unnamed_entity_uses_platform_and_unique_id() {
        let (_dir, _states, _registries, platform) = platform();
        let entity = Arc::new(StaticEntity {
            description: EntityDescription {
                unique_id: Some("ABC".to_string()),
                name: Some(String::new()),
                ..Default::default()
            },
            ..Default::default()
        });
        let ids = platform
            .add_entities("sensor", "demo", "entry1", vec![entity as Arc<dyn Entity>])
            .await
            .unwrap();
        assert_eq!(ids[0].to_string(), "sensor.demo_abc");
    }
}
