//! Config and options flows for attribute_as_sensor

use std::sync::Arc;

use serde_json::Value;

use ha_config_entries::selector::SelectSelectorConfig;
use ha_config_entries::{
    ConfigEntry, FlowInput, Schema, SchemaFlowFormStep, SchemaFlowHandler, SchemaFlowSteps,
    Selector, STEP_INIT, STEP_USER,
};
use ha_state_store::StateStore;

use super::r#const::{
    CONF_ATTRIBUTE, CONF_DEVICE_CLASS, CONF_ENTITY_ID, CONF_ICON, CONF_NAME, CONF_STATE_CLASS,
    CONF_UNIT_OF_MEASUREMENT, CONF_VALUE_TEMPLATE, STEP_ATTR,
};
use crate::sensor::{SensorDeviceClass, SensorStateClass, TEMPERATURE_UNITS};

/// Fields of the user step
pub fn config_schema() -> Schema {
    Schema::new()
        .required(CONF_NAME, Selector::text())
        .required(CONF_ENTITY_ID, Selector::entity())
}

/// Optional presentation fields shared by the attr and init steps
pub fn options_schema() -> Schema {
    let device_classes = SelectSelectorConfig::from_values(
        SensorDeviceClass::ALL.iter().map(SensorDeviceClass::as_str),
    )
    .translation_key(CONF_DEVICE_CLASS);
    let state_classes = SelectSelectorConfig::from_values(
        SensorStateClass::ALL.iter().map(SensorStateClass::as_str),
    )
    .translation_key(CONF_STATE_CLASS);
    let units = SelectSelectorConfig::from_values(TEMPERATURE_UNITS).custom_value(true);

    Schema::new()
        .optional(CONF_VALUE_TEMPLATE, Selector::template())
        .optional(CONF_ICON, Selector::icon())
        .optional(CONF_DEVICE_CLASS, Selector::select(device_classes))
        .optional(CONF_STATE_CLASS, Selector::select(state_classes))
        .optional(CONF_UNIT_OF_MEASUREMENT, Selector::select(units))
}

/// Attribute picker for the chosen source entity followed by the options
/// fields
pub fn attribute_schema(states: &StateStore, options: &FlowInput) -> Schema {
    let entity_id = options
        .get(CONF_ENTITY_ID)
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut attributes: Vec<String> = states
        .get(entity_id)
        .map(|state| state.attributes.keys().cloned().collect())
        .unwrap_or_default();
    attributes.sort();

    Schema::new()
        .required(CONF_ATTRIBUTE, Selector::attribute(entity_id, attributes))
        .extend(&options_schema())
}

fn attribute_step(states: Arc<StateStore>) -> SchemaFlowFormStep {
    SchemaFlowFormStep::dynamic(move |options| attribute_schema(&states, options))
}

/// Two-step config flow: pick a name and source entity, then the attribute
pub fn config_flow(states: Arc<StateStore>) -> SchemaFlowHandler {
    let mut steps = SchemaFlowSteps::new();
    steps.insert(
        STEP_USER.to_string(),
        SchemaFlowFormStep::new(config_schema()).next_step(STEP_ATTR),
    );
    steps.insert(STEP_ATTR.to_string(), attribute_step(states));

    SchemaFlowHandler::config_flow(
        steps,
        Arc::new(|options: &FlowInput| {
            options
                .get(CONF_NAME)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        }),
    )
}

/// Options flow editing the attribute and presentation fields of an entry
pub fn options_flow(states: Arc<StateStore>, entry: &ConfigEntry) -> SchemaFlowHandler {
    let mut steps = SchemaFlowSteps::new();
    steps.insert(STEP_INIT.to_string(), attribute_step(states));
    SchemaFlowHandler::options_flow(steps, entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_config_entries::{FlowHandler, FlowStep};
    use ha_core::Context;
    use ha_event_bus::EventBus;
    use serde_json::json;
    use std::collections::HashMap;

    fn input(value: Value) -> FlowInput {
        value.as_object().cloned().unwrap()
    }

    fn states_with_phone() -> Arc<StateStore> {
        let states = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        let attributes: HashMap<String, Value> = [
            ("level".to_string(), json!(12)),
            ("battery".to_string(), json!(80)),
        ]
        .into_iter()
        .collect();
        states.set(
            "sensor.phone".parse().unwrap(),
            "ok",
            attributes,
            Context::new(),
        );
        states
    }

    #[test]
    fn test_attribute_schema_lists_source_attributes() {
        let states = states_with_phone();
        let schema = attribute_schema(&states, &input(json!({"entity_id": "sensor.phone"})));

        let field = schema.field(CONF_ATTRIBUTE).unwrap();
        assert!(field.required);
        assert_eq!(
            field.selector,
            Selector::attribute(
                "sensor.phone",
                vec!["battery".to_string(), "level".to_string()]
            )
        );
        for name in [
            CONF_VALUE_TEMPLATE,
            CONF_ICON,
            CONF_DEVICE_CLASS,
            CONF_STATE_CLASS,
            CONF_UNIT_OF_MEASUREMENT,
        ] {
            assert!(!schema.field(name).unwrap().required, "{name} is optional");
        }
    }

    #[test]
    fn test_options_schema_validation() {
        let schema = options_schema();
        assert!(schema
            .validate(&input(json!({"unit_of_measurement": "%"})))
            .is_ok());

        let errors = schema
            .validate(&input(json!({"device_class": "nonsense"})))
            .unwrap_err();
        assert_eq!(errors[CONF_DEVICE_CLASS], "invalid_option");

        let errors = schema
            .validate(&input(json!({"value_template": "{{ value "})))
            .unwrap_err();
        assert_eq!(errors[CONF_VALUE_TEMPLATE], "invalid_template");
    }

    #[tokio::test]
    async fn test_config_flow_collects_options() {
        let mut flow = config_flow(states_with_phone());

        let FlowStep::Form { step_id, .. } = flow.step(STEP_USER, None).await.unwrap() else {
            panic!("expected form");
        };
        assert_eq!(step_id, STEP_USER);

        let next = flow
            .step(
                STEP_USER,
                Some(input(json!({"name": "Phone battery", "entity_id": "sensor.phone"}))),
            )
            .await
            .unwrap();
        let FlowStep::Form { step_id, last_step, .. } = next else {
            panic!("expected form");
        };
        assert_eq!(step_id, STEP_ATTR);
        assert_eq!(last_step, Some(true));

        let done = flow
            .step(
                STEP_ATTR,
                Some(input(json!({"attribute": "battery", "device_class": "battery"}))),
            )
            .await
            .unwrap();
        let FlowStep::CreateEntry { title, data, options } = done else {
            panic!("expected entry");
        };
        assert_eq!(title, "Phone battery");
        assert!(data.is_empty());
        assert_eq!(
            options,
            input(json!({
                "name": "Phone battery",
                "entity_id": "sensor.phone",
                "attribute": "battery",
                "device_class": "battery"
            }))
        );
    }

    #[tokio::test]
    async fn test_options_flow_suggests_current_values() {
        let entry = ConfigEntry::new("attribute_as_sensor", "Phone battery").with_options(
            input(json!({
                "name": "Phone battery",
                "entity_id": "sensor.phone",
                "attribute": "battery",
                "icon": "mdi:battery"
            }))
            .into_iter()
            .collect(),
        );
        let mut flow = options_flow(states_with_phone(), &entry);

        let FlowStep::Form { data_schema, .. } = flow.step(STEP_INIT, None).await.unwrap() else {
            panic!("expected form");
        };
        assert_eq!(
            data_schema.field(CONF_ATTRIBUTE).unwrap().suggested_value,
            Some(json!("battery"))
        );
        assert_eq!(
            data_schema.field(CONF_ICON).unwrap().suggested_value,
            Some(json!("mdi:battery"))
        );

        let done = flow
            .step(STEP_INIT, Some(input(json!({"attribute": "level"}))))
            .await
            .unwrap();
        let FlowStep::CreateEntry { title, options, .. } = done else {
            panic!("expected entry");
        };
        assert_eq!(title, "");
        assert_eq!(options["attribute"], "level");
        assert_eq!(options["entity_id"], "sensor.phone");
        assert!(!options.contains_key(CONF_ICON));
    }
}
