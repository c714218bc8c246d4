//! Data entry flows
//!
//! A flow walks the user through one or more form steps. Config flows end
//! by creating a config entry; options flows end by replacing the options
//! of an existing entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryUpdate};
use crate::manager::{ConfigEntries, ConfigEntriesError};
use crate::schema::{FieldErrors, FlowInput, Schema};

/// Step id every config flow starts with
pub const STEP_USER: &str = "user";
/// Step id every options flow starts with
pub const STEP_INIT: &str = "init";

/// Flow errors
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Flow not found: {0}")]
    UnknownFlow(String),

    #[error("Config entry not found: {0}")]
    UnknownEntry(String),

    #[error("Handler does not support step {0}")]
    UnknownStep(String),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

/// What a flow handler wants to happen after a step
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    /// Show a form
    Form {
        step_id: String,
        data_schema: Schema,
        errors: FieldErrors,
        last_step: Option<bool>,
    },
    /// Finish the flow. Options flows only use `options`.
    CreateEntry {
        title: String,
        data: FlowInput,
        options: FlowInput,
    },
    Abort { reason: String },
}

/// One step-driven flow
#[async_trait]
pub trait FlowHandler: Send + Sync {
    /// Run `step_id`; `user_input` is `None` when the step is first shown
    async fn step(
        &mut self,
        step_id: &str,
        user_input: Option<FlowInput>,
    ) -> Result<FlowStep, FlowError>;
}

/// Result returned to the caller driving a flow
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        flow_id: String,
        handler: String,
        step_id: String,
        data_schema: Schema,
        errors: FieldErrors,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_step: Option<bool>,
    },
    CreateEntry {
        flow_id: String,
        handler: String,
        title: String,
        entry_id: String,
        options: FlowInput,
    },
    Abort {
        flow_id: String,
        handler: String,
        reason: String,
    },
}

impl FlowResult {
    pub fn flow_id(&self) -> &str {
        match self {
            FlowResult::Form { flow_id, .. }
            | FlowResult::CreateEntry { flow_id, .. }
            | FlowResult::Abort { flow_id, .. } => flow_id,
        }
    }
}

enum FlowKind {
    Config,
    Options { entry_id: String },
}

struct FlowProgress {
    handler: String,
    kind: FlowKind,
    step_id: String,
    flow: Box<dyn FlowHandler>,
}

/// Tracks flows in progress and applies their results
pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    progress: DashMap<String, FlowProgress>,
}

impl FlowManager {
    pub fn new(entries: Arc<ConfigEntries>) -> Self {
        Self {
            entries,
            progress: DashMap::new(),
        }
    }

    /// Start the config flow of an integration
    pub async fn init_config_flow(&self, domain: &str) -> Result<FlowResult, FlowError> {
        let flow_id = ulid::Ulid::new().to_string();
        let Some(flow) = self
            .entries
            .integration(domain)
            .and_then(|integration| integration.config_flow())
        else {
            warn!("No config flow available for {}", domain);
            return Ok(FlowResult::Abort {
                flow_id,
                handler: domain.to_string(),
                reason: "unknown_handler".to_string(),
            });
        };

        let progress = FlowProgress {
            handler: domain.to_string(),
            kind: FlowKind::Config,
            step_id: STEP_USER.to_string(),
            flow,
        };
        self.run_step(flow_id, progress, None).await
    }

    /// Start the options flow of an existing entry
    pub async fn init_options_flow(&self, entry_id: &str) -> Result<FlowResult, FlowError> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| FlowError::UnknownEntry(entry_id.to_string()))?;
        let flow_id = ulid::Ulid::new().to_string();

        let Some(flow) = self
            .entries
            .integration(&entry.domain)
            .and_then(|integration| integration.options_flow(&entry))
        else {
            return Ok(FlowResult::Abort {
                flow_id,
                handler: entry.domain,
                reason: "not_supported".to_string(),
            });
        };

        let progress = FlowProgress {
            handler: entry.domain,
            kind: FlowKind::Options {
                entry_id: entry_id.to_string(),
            },
            step_id: STEP_INIT.to_string(),
            flow,
        };
        self.run_step(flow_id, progress, None).await
    }

    /// Submit user input to the current step of a flow
    pub async fn configure(
        &self,
        flow_id: &str,
        user_input: FlowInput,
    ) -> Result<FlowResult, FlowError> {
        let (flow_id, progress) = self
            .progress
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        self.run_step(flow_id, progress, Some(user_input)).await
    }

    /// Abort a flow in progress
    pub fn abort(&self, flow_id: &str) -> Result<(), FlowError> {
        if self.progress.remove(flow_id).is_none() {
            return Err(FlowError::UnknownFlow(flow_id.to_string()));
        }
        debug!("Aborted flow {}", flow_id);
        Ok(())
    }

    /// Number of flows waiting for input
    pub fn in_progress(&self) -> usize {
        self.progress.len()
    }

    async fn run_step(
        &self,
        flow_id: String,
        mut progress: FlowProgress,
        user_input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let step = progress.flow.step(&progress.step_id, user_input).await?;

        match step {
            FlowStep::Form {
                step_id,
                data_schema,
                errors,
                last_step,
            } => {
                let handler = progress.handler.clone();
                progress.step_id = step_id.clone();
                self.progress.insert(flow_id.clone(), progress);
                Ok(FlowResult::Form {
                    flow_id,
                    handler,
                    step_id,
                    data_schema,
                    errors,
                    last_step,
                })
            }
            FlowStep::CreateEntry {
                title,
                data,
                options,
            } => self.finish(flow_id, progress, title, data, options).await,
            FlowStep::Abort { reason } => {
                debug!("Flow {} aborted: {}", flow_id, reason);
                Ok(FlowResult::Abort {
                    flow_id,
                    handler: progress.handler,
                    reason,
                })
            }
        }
    }

    async fn finish(
        &self,
        flow_id: String,
        progress: FlowProgress,
        title: String,
        data: FlowInput,
        options: FlowInput,
    ) -> Result<FlowResult, FlowError> {
        let entry_id = match progress.kind {
            FlowKind::Config => {
                let entry = ConfigEntry::new(&progress.handler, title.clone())
                    .with_data(into_map(data))
                    .with_options(into_map(options.clone()));
                let entry = self.entries.add(entry).await?;
                info!("Config flow {} created entry {}", flow_id, entry.entry_id);
                self.entries.setup(&entry.entry_id).await?;
                entry.entry_id
            }
            FlowKind::Options { entry_id } => {
                self.entries
                    .update(
                        &entry_id,
                        ConfigEntryUpdate::new().options(into_map(options.clone())),
                    )
                    .await?;
                debug!("Options flow {} updated entry {}", flow_id, entry_id);
                entry_id
            }
        };

        Ok(FlowResult::CreateEntry {
            flow_id,
            handler: progress.handler,
            title,
            entry_id,
            options,
        })
    }
}

fn into_map(input: FlowInput) -> HashMap<String, serde_json::Value> {
    input.into_iter().collect()
}
