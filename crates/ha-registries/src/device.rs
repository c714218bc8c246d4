//! Helpers linking helper entities to the device of a source entity
//!
//! A helper entity created from another entity is attached to the source
//! entity's device. When the source moves to another device, links the
//! helper's config entry still holds to previous devices are stale and get
//! removed.

use tracing::debug;

use crate::device_registry::{DeviceConnection, DeviceIdentifier, DeviceRegistry};
use crate::entity_registry::{EntityRegistry, EntityRegistryError};

/// What an entity needs to be attached to an existing device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifiers: Vec<DeviceIdentifier>,
    pub connections: Vec<DeviceConnection>,
}

/// Resolve the device of an entity given its entity_id or registry id
///
/// Unregistered entities and entities without a device yield `Ok(None)`;
/// an unknown registry id is an error.
pub fn entity_id_to_device_id(
    entities: &EntityRegistry,
    entity_id_or_uuid: &str,
) -> Result<Option<String>, EntityRegistryError> {
    let entity_id = entities.validate_entity_id(entity_id_or_uuid)?;
    Ok(entities
        .get(&entity_id)
        .and_then(|entry| entry.device_id.clone()))
}

/// Device info that links a new entity to the device of `entity_id_or_uuid`
pub fn device_info_to_link_from_entity(
    entities: &EntityRegistry,
    devices: &DeviceRegistry,
    entity_id_or_uuid: &str,
) -> Result<Option<DeviceInfo>, EntityRegistryError> {
    let Some(device_id) = entity_id_to_device_id(entities, entity_id_or_uuid)? else {
        return Ok(None);
    };

    Ok(devices.get(&device_id).map(|device| DeviceInfo {
        identifiers: device.identifiers.clone(),
        connections: device.connections.clone(),
    }))
}

/// Unlink `config_entry_id` from every device except `current_device_id`
pub fn remove_stale_devices_links_keep_current_device(
    devices: &DeviceRegistry,
    config_entry_id: &str,
    current_device_id: Option<&str>,
) {
    for device in devices.get_by_config_entry_id(config_entry_id) {
        if Some(device.id.as_str()) == current_device_id {
            continue;
        }
        debug!(
            device_id = %device.id,
            config_entry_id, "Removing stale device link"
        );
        devices.remove_config_entry(&device.id, config_entry_id);
    }
}

/// Unlink `config_entry_id` from every device except the one the source
/// entity currently belongs to
pub fn remove_stale_devices_links_keep_entity_device(
    entities: &EntityRegistry,
    devices: &DeviceRegistry,
    config_entry_id: &str,
    source_entity_id_or_uuid: &str,
) -> Result<(), EntityRegistryError> {
    let current_device_id = entity_id_to_device_id(entities, source_entity_id_or_uuid)?;
    remove_stale_devices_links_keep_current_device(
        devices,
        config_entry_id,
        current_device_id.as_deref(),
    );
    Ok(())
}
