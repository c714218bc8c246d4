//! Flows built from a table of form steps
//!
//! Each step shows a schema; submitted values are merged into the options
//! collected so far. A step either names the next step or finishes the flow.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::ConfigEntry;
use crate::flow::{FlowError, FlowHandler, FlowStep};
use crate::schema::{FieldErrors, FlowInput, Schema};

/// Builds a step schema from the options collected so far
pub type SchemaFn = Arc<dyn Fn(&FlowInput) -> Schema + Send + Sync>;

/// Derives the entry title from the collected options
pub type TitleFn = Arc<dyn Fn(&FlowInput) -> String + Send + Sync>;

#[derive(Clone)]
enum StepSchema {
    Static(Schema),
    Dynamic(SchemaFn),
}

/// One form step of a schema flow
#[derive(Clone)]
pub struct SchemaFlowFormStep {
    schema: StepSchema,
    next_step: Option<String>,
}

impl SchemaFlowFormStep {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: StepSchema::Static(schema),
            next_step: None,
        }
    }

    /// Step whose schema depends on earlier answers
    pub fn dynamic<F>(schema: F) -> Self
    where
        F: Fn(&FlowInput) -> Schema + Send + Sync + 'static,
    {
        Self {
            schema: StepSchema::Dynamic(Arc::new(schema)),
            next_step: None,
        }
    }

    pub fn next_step(mut self, step_id: &str) -> Self {
        self.next_step = Some(step_id.to_string());
        self
    }

    fn schema(&self, options: &FlowInput) -> Schema {
        match &self.schema {
            StepSchema::Static(schema) => schema.clone(),
            StepSchema::Dynamic(build) => build(options),
        }
    }
}

pub type SchemaFlowSteps = HashMap<String, SchemaFlowFormStep>;

enum Mode {
    Config { title: TitleFn },
    Options,
}

/// Config or options flow driven by [`SchemaFlowFormStep`]s
pub struct SchemaFlowHandler {
    steps: SchemaFlowSteps,
    options: FlowInput,
    mode: Mode,
}

impl SchemaFlowHandler {
    /// Config flow starting from empty options
    pub fn config_flow(steps: SchemaFlowSteps, title: TitleFn) -> Self {
        Self {
            steps,
            options: FlowInput::new(),
            mode: Mode::Config { title },
        }
    }

    /// Options flow editing a copy of the entry's options
    pub fn options_flow(steps: SchemaFlowSteps, entry: &ConfigEntry) -> Self {
        Self {
            steps,
            options: entry
                .options
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            mode: Mode::Options,
        }
    }

    /// Options collected so far
    pub fn options(&self) -> &FlowInput {
        &self.options
    }

    fn form_step(&self, step_id: &str) -> Result<SchemaFlowFormStep, FlowError> {
        self.steps
            .get(step_id)
            .cloned()
            .ok_or_else(|| FlowError::UnknownStep(step_id.to_string()))
    }

    fn show_form(
        &self,
        step_id: &str,
        form_step: &SchemaFlowFormStep,
        suggested: &FlowInput,
        errors: FieldErrors,
    ) -> FlowStep {
        FlowStep::Form {
            step_id: step_id.to_string(),
            data_schema: form_step
                .schema(&self.options)
                .with_suggested_values(suggested),
            errors,
            last_step: Some(form_step.next_step.is_none()),
        }
    }

    fn create_entry(&self) -> FlowStep {
        let title = match &self.mode {
            Mode::Config { title } => title(&self.options),
            Mode::Options => String::new(),
        };
        FlowStep::CreateEntry {
            title,
            data: FlowInput::new(),
            options: self.options.clone(),
        }
    }
}

#[async_trait]
impl FlowHandler for SchemaFlowHandler {
    async fn step(
        &mut self,
        step_id: &str,
        user_input: Option<FlowInput>,
    ) -> Result<FlowStep, FlowError> {
        let form_step = self.form_step(step_id)?;

        let Some(input) = user_input else {
            return Ok(self.show_form(step_id, &form_step, &self.options, FieldErrors::new()));
        };

        let schema = form_step.schema(&self.options);
        let valid = match schema.validate(&input) {
            Ok(valid) => valid,
            Err(errors) => {
                let mut suggested = self.options.clone();
                suggested.extend(input);
                return Ok(self.show_form(step_id, &form_step, &suggested, errors));
            }
        };

        // Optional fields left out of the submission clear earlier values
        for field in schema.fields() {
            if !field.required && !valid.contains_key(&field.name) {
                self.options.remove(&field.name);
            }
        }
        self.options.extend(valid);

        match form_step.next_step {
            Some(next) => {
                let next_step = self.form_step(&next)?;
                Ok(self.show_form(&next, &next_step, &self.options, FieldErrors::new()))
            }
            None => Ok(self.create_entry()),
        }
    }
}
