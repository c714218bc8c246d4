//! Config entries and the flows that create and edit them
//!
//! A [`ConfigEntry`] is one configured instance of an integration. The
//! [`ConfigEntries`] manager stores entries and moves them through their
//! lifecycle by calling the [`Integration`] registered for their domain.
//! [`FlowManager`] runs the step-by-step config and options flows; a
//! [`SchemaFlowHandler`] builds such a flow from a table of form steps.

pub mod entry;
pub mod flow;
pub mod integration;
pub mod manager;
pub mod schema;
pub mod schema_flow;
pub mod selector;
pub mod state_machine;

pub use entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
pub use integration::{reload_on_update, Integration, SetupError, UnloadCallback, UpdateListener};
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, STORAGE_KEY,
    STORAGE_MINOR_VERSION, STORAGE_VERSION,
};

pub use flow::{FlowError, FlowHandler, FlowManager, FlowResult, FlowStep, STEP_INIT, STEP_USER};
pub use schema::{FieldErrors, FlowInput, Schema, SchemaField};
pub use schema_flow::{SchemaFlowFormStep, SchemaFlowHandler, SchemaFlowSteps, SchemaFn, TitleFn};
pub use selector::Selector;
pub use state_machine::InvalidTransition;
