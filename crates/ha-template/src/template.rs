//! Template handles bound to an engine

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::TemplateEngine;
use crate::error::TemplateResult;

/// A template string bound to the engine that renders it
#[derive(Clone)]
pub struct Template {
    source: String,
    engine: Arc<TemplateEngine>,
}

#[derive(Serialize)]
struct ValueContext<'a> {
    value: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_json: Option<serde_json::Value>,
}

impl Template {
    pub fn new(source: impl Into<String>, engine: Arc<TemplateEngine>) -> Self {
        Self {
            source: source.into(),
            engine,
        }
    }

    /// Compile the template, returning the syntax error if it has one
    pub fn ensure_valid(&self) -> TemplateResult<()> {
        self.engine.check(&self.source)
    }

    /// Render a value template
    ///
    /// `value` is available to the template as-is. When it is a string
    /// holding a JSON document, the parsed document is also available as
    /// `value_json`. The result is trimmed.
    pub fn render_with_possible_json_value(
        &self,
        value: &serde_json::Value,
    ) -> TemplateResult<String> {
        let value_json = value
            .as_str()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok());

        let rendered = self
            .engine
            .render_with_context(&self.source, ValueContext { value, value_json })?;
        Ok(rendered.trim().to_string())
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
