//! Shared helpers for the component integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::TempDir;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

use ha_components::attribute_as_sensor::DOMAIN;
use ha_components::HomeAssistant;
use ha_config_entries::{ConfigEntry, FlowInput};

/// Messages of the error events recorded while the guard is alive
#[derive(Clone, Default)]
pub struct ErrorLog(Arc<Mutex<Vec<String>>>);

impl ErrorLog {
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Number of recorded errors containing `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.messages().iter().filter(|m| m.contains(needle)).count()
    }
}

struct ErrorCapture(ErrorLog);

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for ErrorCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            self.0 .0.lock().unwrap().push(visitor.0);
        }
    }
}

/// Record error events on the current thread until the guard is dropped
pub fn capture_errors() -> (ErrorLog, DefaultGuard) {
    let log = ErrorLog::default();
    let subscriber = Registry::default().with(ErrorCapture(log.clone()));
    let guard = tracing::subscriber::set_default(subscriber);
    (log, guard)
}

pub async fn start_hass() -> (TempDir, HomeAssistant) {
    let dir = TempDir::new().unwrap();
    let hass = HomeAssistant::new(dir.path());
    hass.start().await.unwrap();
    (dir, hass)
}

pub fn to_map(value: Value) -> HashMap<String, Value> {
    value
        .as_object()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .collect()
}

/// Flow input from a JSON object
pub fn input(value: Value) -> FlowInput {
    value.as_object().cloned().unwrap_or_default()
}

pub fn set_state(hass: &HomeAssistant, entity_id: &str, state: &str, attributes: Value) {
    hass.states.set(
        entity_id.parse().unwrap(),
        state,
        to_map(attributes),
        ha_core::Context::new(),
    );
}

pub fn published(hass: &HomeAssistant, entity_id: &str) -> Option<String> {
    hass.states.get_state(entity_id)
}

/// Add an attribute_as_sensor entry with `options` without setting it up
pub async fn add_entry(hass: &HomeAssistant, options: Value) -> ConfigEntry {
    let title = options
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let entry = ConfigEntry::new(DOMAIN, title).with_options(to_map(options));
    hass.config_entries.add(entry).await.unwrap()
}

/// Add and set up an attribute_as_sensor entry
pub async fn setup_entry(hass: &HomeAssistant, options: Value) -> ConfigEntry {
    let entry = add_entry(hass, options).await;
    hass.config_entries.setup(&entry.entry_id).await.unwrap();
    hass.config_entries.get(&entry.entry_id).unwrap()
}
