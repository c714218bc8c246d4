//! Form field selectors
//!
//! A selector describes how a flow form field is edited and validates the
//! submitted value.

use ha_core::valid_entity_id;
use serde::Serialize;
use serde_json::Value;

/// Validation error codes reported in a flow's `errors` map
pub mod codes {
    pub const REQUIRED: &str = "required";
    pub const INVALID_ENTITY_ID: &str = "invalid_entity_id";
    pub const INVALID_OPTION: &str = "invalid_option";
    pub const INVALID_TEMPLATE: &str = "invalid_template";
    pub const INVALID_VALUE: &str = "invalid_value";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextSelectorConfig {}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntitySelectorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Vec<String>>,
    pub multiple: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeSelectorConfig {
    pub entity_id: String,
    /// Attribute names currently present on the entity
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateSelectorConfig {}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IconSelectorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectSelectorMode {
    #[default]
    Dropdown,
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectSelectorConfig {
    pub options: Vec<SelectOption>,
    /// Accept values outside `options`
    pub custom_value: bool,
    pub mode: SelectSelectorMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_key: Option<String>,
}

impl SelectSelectorConfig {
    /// Select over plain string options
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: values.into_iter().map(SelectOption::new).collect(),
            ..Default::default()
        }
    }

    pub fn custom_value(mut self, custom_value: bool) -> Self {
        self.custom_value = custom_value;
        self
    }

    pub fn translation_key(mut self, key: impl Into<String>) -> Self {
        self.translation_key = Some(key.into());
        self
    }
}

/// Form field selector, serialized as `{"<kind>": {config}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Text(TextSelectorConfig),
    Entity(EntitySelectorConfig),
    Attribute(AttributeSelectorConfig),
    Template(TemplateSelectorConfig),
    Icon(IconSelectorConfig),
    Select(SelectSelectorConfig),
}

impl Selector {
    pub fn text() -> Self {
        Selector::Text(TextSelectorConfig::default())
    }

    /// Single entity picker
    pub fn entity() -> Self {
        Selector::Entity(EntitySelectorConfig::default())
    }

    pub fn attribute(entity_id: impl Into<String>, attributes: Vec<String>) -> Self {
        Selector::Attribute(AttributeSelectorConfig {
            entity_id: entity_id.into(),
            attributes,
        })
    }

    pub fn template() -> Self {
        Selector::Template(TemplateSelectorConfig::default())
    }

    pub fn icon() -> Self {
        Selector::Icon(IconSelectorConfig::default())
    }

    pub fn select(config: SelectSelectorConfig) -> Self {
        Selector::Select(config)
    }

    /// Validate a submitted value, returning the value to store or an error code
    pub fn validate(&self, value: &Value) -> Result<Value, &'static str> {
        match self {
            Selector::Text(_) | Selector::Icon(_) => match value {
                Value::String(_) => Ok(value.clone()),
                _ => Err(codes::INVALID_VALUE),
            },
            Selector::Entity(config) => validate_entity(config, value),
            Selector::Attribute(_) => match value.as_str() {
                Some(s) if !s.is_empty() => Ok(value.clone()),
                _ => Err(codes::INVALID_VALUE),
            },
            Selector::Template(_) => {
                let source = value.as_str().ok_or(codes::INVALID_VALUE)?;
                ha_template::validate_syntax(source).map_err(|_| codes::INVALID_TEMPLATE)?;
                Ok(value.clone())
            }
            Selector::Select(config) => {
                let choice = value.as_str().ok_or(codes::INVALID_VALUE)?;
                if config.custom_value || config.options.iter().any(|o| o.value == choice) {
                    Ok(value.clone())
                } else {
                    Err(codes::INVALID_OPTION)
                }
            }
        }
    }
}

fn validate_entity(config: &EntitySelectorConfig, value: &Value) -> Result<Value, &'static str> {
    let check = |entity_id: &str| -> Result<Value, &'static str> {
        let entity_id = entity_id.to_lowercase();
        if !valid_entity_id(&entity_id) {
            return Err(codes::INVALID_ENTITY_ID);
        }
        if let Some(ref domains) = config.domain {
            let domain = entity_id.split('.').next().unwrap_or_default();
            if !domains.iter().any(|d| d == domain) {
                return Err(codes::INVALID_ENTITY_ID);
            }
        }
        Ok(Value::String(entity_id))
    };

    match value {
        Value::String(entity_id) if !config.multiple => check(entity_id),
        Value::Array(items) if config.multiple => items
            .iter()
            .map(|item| item.as_str().ok_or(codes::INVALID_ENTITY_ID).and_then(check))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        _ => Err(codes::INVALID_ENTITY_ID),
    }
}
