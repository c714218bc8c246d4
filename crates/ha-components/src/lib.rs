//! Home Assistant Components
//!
//! The Home Assistant instance, the entity platform, the sensor entity
//! model, and the `attribute_as_sensor` integration that exposes one
//! attribute of an entity as a sensor of its own.

pub mod attribute_as_sensor;
pub mod entity;
pub mod hass;
pub mod sensor;

pub use attribute_as_sensor::{
    AttributeAsSensor, AttributeSensor, AttributeSensorConfig, AttributeSensorError,
};
pub use entity::{Entity, EntityDescription, EntityError, EntityPlatform};
pub use hass::{HassCore, HomeAssistant};
pub use sensor::{SensorDeviceClass, SensorStateClass};
