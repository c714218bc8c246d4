//! The `states` global and the state objects templates see
//!
//! `states('sensor.phone')` yields the state string, `unknown` when there is
//! no such entity. `states.sensor.phone` yields a [`TemplateState`] or
//! nothing.

use std::fmt;
use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};

use ha_core::attrs::ATTR_FRIENDLY_NAME;
use ha_core::{State, STATE_UNKNOWN};
use ha_state_store::StateStore;

#[derive(Clone)]
pub struct StatesObject {
    store: Arc<StateStore>,
}

impl fmt::Debug for StatesObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StatesObject")
    }
}

impl StatesObject {
    pub fn new(store: Arc<StateStore>) -> Self {
        StatesObject { store }
    }

    pub fn state(&self, entity_id: &str) -> String {
        self.store
            .get_state(entity_id)
            .unwrap_or_else(|| STATE_UNKNOWN.to_owned())
    }

    /// `expected` is a single state or a list of accepted states
    pub fn is_state(&self, entity_id: &str, expected: &Value) -> bool {
        let Some(current) = self.store.get_state(entity_id) else {
            return false;
        };
        match expected.as_str() {
            Some(single) => single == current,
            None => expected
                .try_iter()
                .map(|mut states| states.any(|s| s.as_str() == Some(current.as_str())))
                .unwrap_or(false),
        }
    }

    /// The attribute value, or none when the entity or attribute is missing
    pub fn state_attr(&self, entity_id: &str, attribute: &str) -> Value {
        self.store
            .get(entity_id)
            .and_then(|state| state.attributes.get(attribute).map(Value::from_serialize))
            .unwrap_or(Value::from(()))
    }

    /// Whether the entity exists with a state other than unknown/unavailable
    pub fn has_value(&self, entity_id: &str) -> bool {
        self.store
            .get(entity_id)
            .is_some_and(|state| !(state.is_unknown() || state.is_unavailable()))
    }

    fn lookup(&self, entity_id: &str) -> Option<Value> {
        self.store
            .get(entity_id)
            .map(|state| Value::from_object(TemplateState(state)))
    }
}

impl Object for StatesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        if key.contains('.') {
            return self.lookup(key);
        }
        Some(Value::from_object(DomainStates {
            domain: key.to_owned(),
            states: StatesObject::clone(self),
        }))
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, args: &[Value]) -> Result<Value, Error> {
        match args {
            [entity_id] => entity_id
                .as_str()
                .map(|entity_id| Value::from(self.state(entity_id)))
                .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "states() takes an entity id")),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                "states() takes a single entity id",
            )),
        }
    }
}

/// `states.<domain>`; attribute access picks the object id
#[derive(Debug, Clone)]
struct DomainStates {
    domain: String,
    states: StatesObject,
}

impl Object for DomainStates {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.states
            .lookup(&format!("{}.{}", self.domain, key.as_str()?))
    }
}

/// A state snapshot as a template object; renders as its state string
#[derive(Debug, Clone)]
pub struct TemplateState(pub State);

impl TemplateState {
    fn name(&self) -> &str {
        self.0
            .attributes
            .get(ATTR_FRIENDLY_NAME)
            .and_then(|name| name.as_str())
            .unwrap_or_else(|| self.0.entity_id.object_id())
    }
}

impl fmt::Display for TemplateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.state)
    }
}

impl Object for TemplateState {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let state = &self.0;
        let value = match key.as_str()? {
            "state" => Value::from(state.state.as_str()),
            "entity_id" => Value::from(state.entity_id.to_string()),
            "domain" => Value::from(state.entity_id.domain()),
            "object_id" => Value::from(state.entity_id.object_id()),
            "name" => Value::from(self.name()),
            "attributes" => Value::from_serialize(&state.attributes),
            "last_changed" => Value::from(state.last_changed.to_rfc3339()),
            "last_updated" => Value::from(state.last_updated.to_rfc3339()),
            "last_reported" => Value::from(state.last_reported.to_rfc3339()),
            _ => return None,
        };
        Some(value)
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result
    where
        Self: Sized + 'static,
    {
        fmt::Display::fmt(&**self, f)
    }
}
