//! Jinja2-compatible template engine for Home Assistant
//!
//! This crate provides a template engine built on minijinja with
//! Home Assistant-specific extensions:
//!
//! # State Access
//!
//! - `states('entity_id')` - Get entity state as string
//! - `states.sensor.phone` - Access state object
//! - `is_state('entity_id', 'on')` - Check if entity is in state
//! - `state_attr('entity_id', 'battery')` - Get attribute value
//! - `has_value('entity_id')` - Check if entity has valid value
//!
//! # Filters
//!
//! - `| round(2)` - Round to precision
//! - `| int` / `| float` / `| bool` - Type conversion
//! - `| slugify` - Convert to slug
//! - `| to_json` / `| from_json` - JSON serialization
//!
//! # Value templates
//!
//! A [`Template`] is a template string bound to an engine. Value templates
//! are rendered with `value` (and `value_json` when the value is a JSON
//! document) in scope:
//!
//! ```ignore
//! let template = Template::new("{{ value | int * 2 }}", engine);
//! template.ensure_valid()?;
//! assert_eq!(template.render_with_possible_json_value(&json!("21"))?, "42");
//! ```

mod engine;
mod error;
mod filters;
mod states;
mod template;

pub use engine::{validate_syntax, TemplateEngine};
pub use error::{TemplateError, TemplateResult};
pub use states::{StatesObject, TemplateState};
pub use template::Template;

// Re-export minijinja Value for convenience
pub use minijinja::Value;
