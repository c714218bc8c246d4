//! Flow form schemas

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::selector::{codes, Selector};

/// User input submitted to a flow step
pub type FlowInput = serde_json::Map<String, Value>;

/// Field errors keyed by field name (or `base`)
pub type FieldErrors = HashMap<String, String>;

/// A single form field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaField {
    pub name: String,
    pub required: bool,
    pub selector: Selector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Pre-filled value shown by the form, not applied on submit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_value: Option<Value>,
}

/// Ordered list of form fields
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<SchemaField>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, required: bool, selector: Selector) -> Self {
        self.fields.retain(|f| f.name != name);
        self.fields.push(SchemaField {
            name: name.to_string(),
            required,
            selector,
            default: None,
            suggested_value: None,
        });
        self
    }

    /// Add a required field
    pub fn required(self, name: &str, selector: Selector) -> Self {
        self.push(name, true, selector)
    }

    /// Add an optional field
    pub fn optional(self, name: &str, selector: Selector) -> Self {
        self.push(name, false, selector)
    }

    /// Append the fields of `other`, replacing fields with the same name
    pub fn extend(mut self, other: &Schema) -> Self {
        for field in &other.fields {
            self.fields.retain(|f| f.name != field.name);
            self.fields.push(field.clone());
        }
        self
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Pre-fill fields from `values`; fields without a value are left as is
    pub fn with_suggested_values(mut self, values: &FlowInput) -> Self {
        for field in &mut self.fields {
            if let Some(value) = values.get(&field.name).filter(|v| !v.is_null()) {
                field.suggested_value = Some(value.clone());
            }
        }
        self
    }

    /// Validate submitted input against the schema
    ///
    /// Keys the schema does not know are dropped. Null values count as
    /// omitted.
    pub fn validate(&self, input: &FlowInput) -> Result<FlowInput, FieldErrors> {
        let mut output = FlowInput::new();
        let mut errors = FieldErrors::new();

        for field in &self.fields {
            match input.get(&field.name).filter(|v| !v.is_null()) {
                Some(value) => match field.selector.validate(value) {
                    Ok(value) => {
                        output.insert(field.name.clone(), value);
                    }
                    Err(code) => {
                        errors.insert(field.name.clone(), code.to_string());
                    }
                },
                None => match (&field.default, field.required) {
                    (Some(default), _) => {
                        output.insert(field.name.clone(), default.clone());
                    }
                    (None, true) => {
                        errors.insert(field.name.clone(), codes::REQUIRED.to_string());
                    }
                    (None, false) => {}
                },
            }
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(errors)
        }
    }
}
