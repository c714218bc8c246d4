//! The minijinja environment with the state helpers installed

use std::sync::Arc;

use minijinja::{Environment, Value};
use serde::Serialize;
use tracing::trace;

use ha_state_store::StateStore;

use crate::error::TemplateResult;
use crate::filters;
use crate::states::StatesObject;

/// Renders template sources against the live state store
///
/// Globals: the `states` object and the `is_state`, `state_attr` and
/// `has_value` functions. Filters: `float`, `int`, `bool`, `round`,
/// `slugify`, `to_json` and `from_json`, plus the `number` test.
pub struct TemplateEngine {
    env: Environment<'static>,
}

fn install_state_helpers(env: &mut Environment<'static>, states: StatesObject) {
    let lookup = Arc::new(states.clone());
    env.add_global("states", Value::from_object(states));

    let is_state = Arc::clone(&lookup);
    env.add_function("is_state", move |entity_id: &str, expected: Value| {
        is_state.is_state(entity_id, &expected)
    });
    let state_attr = Arc::clone(&lookup);
    env.add_function("state_attr", move |entity_id: &str, name: &str| {
        state_attr.state_attr(entity_id, name)
    });
    env.add_function("has_value", move |entity_id: &str| lookup.has_value(entity_id));
}

fn install_filters(env: &mut Environment<'static>) {
    env.add_filter("float", filters::to_float);
    env.add_filter("int", filters::to_int);
    env.add_filter("bool", filters::to_bool);
    env.add_filter("round", filters::round_filter);
    env.add_filter("slugify", filters::slugify);
    env.add_filter("to_json", filters::to_json);
    env.add_filter("from_json", filters::from_json);
    env.add_test("number", filters::is_number);
}

impl TemplateEngine {
    pub fn new(states: Arc<StateStore>) -> Self {
        let mut env = Environment::new();
        install_filters(&mut env);
        install_state_helpers(&mut env, StatesObject::new(states));
        TemplateEngine { env }
    }

    /// Parse `source` without rendering it
    pub fn check(&self, source: &str) -> TemplateResult<()> {
        self.env.template_from_str(source).map(drop).map_err(Into::into)
    }

    /// Render `source` with the fields of `vars` in scope
    pub fn render_with_context(&self, source: &str, vars: impl Serialize) -> TemplateResult<String> {
        trace!("Rendering template {:?}", source);
        Ok(self.env.template_from_str(source)?.render(vars)?)
    }
}

/// Parse `source` with a bare environment
///
/// Unknown functions and filters are not caught here; they fail at render
/// time.
pub fn validate_syntax(source: &str) -> TemplateResult<()> {
    Environment::new()
        .template_from_str(source)
        .map(drop)
        .map_err(Into::into)
}
