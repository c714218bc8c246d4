//! Constants for the attribute_as_sensor integration

pub const DOMAIN: &str = "attribute_as_sensor";

pub const CONF_NAME: &str = "name";
pub const CONF_ENTITY_ID: &str = "entity_id";
pub const CONF_ATTRIBUTE: &str = "attribute";
pub const CONF_ICON: &str = "icon";
pub const CONF_DEVICE_CLASS: &str = "device_class";
pub const CONF_STATE_CLASS: &str = "state_class";
pub const CONF_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
pub const CONF_VALUE_TEMPLATE: &str = "value_template";

/// Second config flow step: pick the attribute and display options
pub const STEP_ATTR: &str = "attr";
