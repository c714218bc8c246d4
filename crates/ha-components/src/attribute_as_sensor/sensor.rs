//! Sensor platform for attribute_as_sensor

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tracing::{debug, error};

use ha_config_entries::ConfigEntry;
use ha_core::attrs::ATTR_ENTITY_ID;
use ha_core::events::{StateChangedData, StateReportedData};
use ha_core::{Context, EntityId, Event, State, STATE_UNAVAILABLE, STATE_UNKNOWN};
use ha_event_bus::tracking::{track_state_change_event, track_state_report_event};
use ha_event_bus::{EventBus, Subscription};
use ha_registries::device::device_info_to_link_from_entity;
use ha_state_store::StateStore;
use ha_template::{Template, TemplateError};

use super::r#const::DOMAIN;
use super::{AttributeSensorConfig, AttributeSensorError};
use crate::entity::{Entity, EntityDescription};
use crate::hass::HassCore;
use crate::sensor::{self, native_value_to_state};

/// Create the sensor of a config entry and add it to the sensor domain
pub async fn setup_entry(
    core: &HassCore,
    entry: &ConfigEntry,
    config: &AttributeSensorConfig,
) -> Result<(), AttributeSensorError> {
    let registries = &core.registries;
    let source_entity_id = registries.entities.validate_entity_id(&config.entity_id)?;
    let device_info =
        device_info_to_link_from_entity(&registries.entities, &registries.devices, &source_entity_id)?;

    let description = EntityDescription {
        unique_id: Some(entry.entry_id.clone()),
        name: config.name.clone(),
        icon: config.icon.clone(),
        device_class: config.device_class.map(|c| c.to_string()),
        state_class: config.state_class.map(|c| c.to_string()),
        unit_of_measurement: config.unit_of_measurement.clone(),
        device_info,
    };
    let template = config
        .value_template()
        .map(|source| Template::new(source, core.templates.clone()));

    let sensor: Arc<dyn Entity> = Arc::new(AttributeSensor::new(
        core.bus.clone(),
        core.states.clone(),
        description,
        source_entity_id,
        config.attribute.clone(),
        template,
    ));

    core.entity_platform
        .add_entities(sensor::DOMAIN, DOMAIN, &entry.entry_id, vec![sensor])
        .await?;
    Ok(())
}

#[derive(Debug, Default)]
struct SensorRuntime {
    /// Set while the sensor is attached
    entity_id: Option<EntityId>,
    native_value: Value,
    available: bool,
    /// The missing attribute has been logged since it was last present
    has_logged: bool,
}

struct SensorShared {
    description: EntityDescription,
    source_entity_id: String,
    attribute: String,
    template: Option<Template>,
    states: Arc<StateStore>,
    runtime: Mutex<SensorRuntime>,
}

impl SensorShared {
    fn runtime(&self) -> MutexGuard<'_, SensorRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recompute the value from a snapshot of the source entity and
    /// publish it
    fn update(
        &self,
        snapshot: Option<&State>,
        initial: bool,
        context: Context,
    ) -> Result<(), TemplateError> {
        debug!(
            "Updating {} from {}: {:?}",
            self.attribute,
            self.source_entity_id,
            snapshot.map(|s| &s.state)
        );

        let mut runtime = self.runtime();
        runtime.available = snapshot.map_or(true, |s| !s.is_unavailable());

        if !initial && snapshot.map_or(true, |s| s.is_unknown() || s.is_unavailable()) {
            debug!("Ignoring update of {}", self.source_entity_id);
            return Ok(());
        }

        match snapshot.and_then(|s| s.attributes.get(&self.attribute)) {
            None => {
                runtime.native_value = Value::String(STATE_UNAVAILABLE.to_string());
                if !runtime.has_logged {
                    error!(
                        "Attribute ({}) not found in state attributes for entity {}",
                        self.attribute, self.source_entity_id
                    );
                    runtime.has_logged = true;
                }
            }
            Some(raw) => {
                runtime.has_logged = false;
                runtime.native_value = match &self.template {
                    Some(template) => Value::String(template.render_with_possible_json_value(raw)?),
                    None => raw.clone(),
                };
                debug!("New value of {}: {}", self.attribute, runtime.native_value);
            }
        }

        let Some(entity_id) = runtime.entity_id.clone() else {
            return Ok(());
        };
        let value = runtime.native_value.clone();
        let available = runtime.available;
        drop(runtime);

        self.write_state(entity_id, &value, available, context);
        Ok(())
    }

    fn write_state(&self, entity_id: EntityId, value: &Value, available: bool, context: Context) {
        let state = if !available {
            STATE_UNAVAILABLE.to_string()
        } else {
            native_value_to_state(value).unwrap_or_else(|| {
                error!("Value of {} is too long to be a state: {}", entity_id, value);
                STATE_UNKNOWN.to_string()
            })
        };

        let mut attributes = self.description.state_attributes();
        attributes.insert(ATTR_ENTITY_ID.to_string(), json!(self.source_entity_id));
        self.states.set(entity_id, state, attributes, context);
    }
}

/// Sensor publishing one attribute of a source entity
pub struct AttributeSensor {
    bus: Arc<EventBus>,
    shared: Arc<SensorShared>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl AttributeSensor {
    pub fn new(
        bus: Arc<EventBus>,
        states: Arc<StateStore>,
        description: EntityDescription,
        source_entity_id: String,
        attribute: String,
        template: Option<Template>,
    ) -> Self {
        Self {
            bus,
            shared: Arc::new(SensorShared {
                description,
                source_entity_id,
                attribute,
                template,
                states,
                runtime: Mutex::new(SensorRuntime {
                    available: true,
                    ..Default::default()
                }),
            }),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn native_value(&self) -> Value {
        self.shared.runtime().native_value.clone()
    }

    pub fn available(&self) -> bool {
        self.shared.runtime().available
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Entity for AttributeSensor {
    fn description(&self) -> &EntityDescription {
        &self.shared.description
    }

    fn added_to_hass(&self, entity_id: EntityId) {
        self.shared.runtime().entity_id = Some(entity_id);
        let source = std::slice::from_ref(&self.shared.source_entity_id);

        let shared = self.shared.clone();
        let changed = track_state_change_event(
            &self.bus,
            source,
            move |event: Event<StateChangedData>| {
                shared.update(event.data.new_state.as_ref(), false, event.context.child())
            },
        );
        let shared = self.shared.clone();
        let reported = track_state_report_event(
            &self.bus,
            source,
            move |event: Event<StateReportedData>| {
                shared.update(Some(&event.data.new_state), false, event.context.child())
            },
        );
        self.subscriptions().extend([changed, reported]);

        let snapshot = self.shared.states.get(&self.shared.source_entity_id);
        if let Err(err) = self.shared.update(snapshot.as_ref(), true, Context::new()) {
            error!(
                "Error rendering {} for {}: {}",
                self.shared.attribute, self.shared.source_entity_id, err
            );
        }
    }

    fn will_remove_from_hass(&self) {
        self.subscriptions().clear();
        self.shared.runtime().entity_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::events::{STATE_CHANGED, STATE_REPORTED};
    use ha_template::TemplateEngine;
    use std::collections::HashMap;

    struct Fixture {
        bus: Arc<EventBus>,
        states: Arc<StateStore>,
        sensor: AttributeSensor,
    }

    const SENSOR: &str = "sensor.phone_battery";
    const SOURCE: &str = "sensor.phone";

    fn fixture(template: Option<&str>) -> Fixture {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        let engine = Arc::new(TemplateEngine::new(states.clone()));
        let sensor = AttributeSensor::new(
            bus.clone(),
            states.clone(),
            EntityDescription {
                name: Some("Phone battery".to_string()),
                ..Default::default()
            },
            SOURCE.to_string(),
            "battery".to_string(),
            template.map(|t| Template::new(t, engine)),
        );
        Fixture { bus, states, sensor }
    }

    fn set_source(states: &StateStore, state: &str, attributes: Value) {
        let attributes: HashMap<String, Value> = attributes
            .as_object()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        states.set(SOURCE.parse().unwrap(), state, attributes, Context::new());
    }

    fn published(states: &StateStore) -> String {
        states.get_state(SENSOR).unwrap()
    }

    #[test]
    fn test_value_follows_attribute() {
        let f = fixture(None);
        set_source(&f.states, "ok", json!({"battery": 80}));
        f.sensor.added_to_hass(SENSOR.parse().unwrap());
        assert_eq!(published(&f.states), "80");

        set_source(&f.states, "ok", json!({"battery": 79}));
        assert_eq!(f.sensor.native_value(), json!(79));
        assert_eq!(published(&f.states), "79");

        let state = f.states.get(SENSOR).unwrap();
        assert_eq!(state.attributes[ATTR_ENTITY_ID], SOURCE);
        assert_eq!(state.attributes["friendly_name"], "Phone battery");
    }

    #[test]
    fn test_template_renders_value() {
        let f = fixture(Some("{{ value | upper }}"));
        f.sensor.added_to_hass(SENSOR.parse().unwrap());
        set_source(&f.states, "on", json!({"battery": "ok"}));
        assert_eq!(published(&f.states), "OK");
    }

    #[test]
    fn test_template_reads_value_json() {
        let f = fixture(Some("{{ value_json.level }}"));
        f.sensor.added_to_hass(SENSOR.parse().unwrap());
        set_source(&f.states, "on", json!({"battery": r#"{"level": 55}"#}));
        assert_eq!(published(&f.states), "55");
    }

    #[test]
    fn test_initial_absent_source_publishes_unavailable() {
        let f = fixture(None);
        f.sensor.added_to_hass(SENSOR.parse().unwrap());
        assert_eq!(f.sensor.native_value(), json!("unavailable"));
        assert!(f.sensor.available());
        assert_eq!(published(&f.states), "unavailable");
    }

    #[test]
    fn test_initial_unknown_source_is_not_skipped() {
        let f = fixture(None);
        set_source(&f.states, "unknown", json!({"battery": 10}));
        f.sensor.added_to_hass(SENSOR.parse().unwrap());
        assert_eq!(published(&f.states), "10");
    }

    #[test]
    fn test_live_unknown_and_unavailable_hold_value() {
        let f = fixture(None);
        set_source(&f.states, "ok", json!({"battery": 80}));
        f.sensor.added_to_hass(SENSOR.parse().unwrap());

        set_source(&f.states, "unknown", json!({"battery": 1}));
        assert_eq!(published(&f.states), "80");
        set_source(&f.states, "unavailable", json!({}));
        assert_eq!(published(&f.states), "80");
        assert_eq!(f.sensor.native_value(), json!(80));
    }

    #[test]
    fn test_reported_state_is_handled() {
        let f = fixture(Some("{{ states('sensor.other') }}"));
        set_source(&f.states, "ok", json!({"battery": 80}));
        f.sensor.added_to_hass(SENSOR.parse().unwrap());
        assert_eq!(published(&f.states), "unknown");

        f.states.set(
            "sensor.other".parse().unwrap(),
            "7",
            HashMap::new(),
            Context::new(),
        );
        // Same source state again only fires state_reported
        set_source(&f.states, "ok", json!({"battery": 80}));
        assert_eq!(published(&f.states), "7");
    }

    #[test]
    fn test_removal_cancels_listeners() {
        let f = fixture(None);
        f.sensor.added_to_hass(SENSOR.parse().unwrap());
        assert_eq!(f.bus.listener_count(STATE_CHANGED), 1);
        assert_eq!(f.bus.listener_count(STATE_REPORTED), 1);

        f.sensor.will_remove_from_hass();
        assert_eq!(f.bus.listener_count(STATE_CHANGED), 0);
        assert_eq!(f.bus.listener_count(STATE_REPORTED), 0);

        set_source(&f.states, "ok", json!({"battery": 5}));
        assert_eq!(f.sensor.native_value(), json!("unavailable"));
    }
}
