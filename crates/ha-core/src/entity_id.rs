//! `domain.object_id` entity identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("Entity id needs a single '.' between domain and object id")]
    InvalidFormat,
    #[error("Entity id has an empty domain")]
    EmptyDomain,
    #[error("Entity id has an empty object id")]
    EmptyObjectId,
    #[error("Invalid domain characters; expected [a-z0-9_] without leading, trailing or doubled '_'")]
    InvalidDomainChars,
    #[error("Invalid object id characters; expected [a-z0-9_] without leading or trailing '_'")]
    InvalidObjectIdChars,
}

/// A validated entity id such as `sensor.phone_battery`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

/// Lowercase ASCII letters, digits and inner underscores
fn is_slug(part: &str) -> bool {
    let edges_ok = !part.starts_with('_') && !part.ends_with('_');
    edges_ok
        && part
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_'))
}

impl EntityId {
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let (domain, object_id) = (domain.into(), object_id.into());

        match (domain.as_str(), object_id.as_str()) {
            ("", _) => Err(EntityIdError::EmptyDomain),
            (_, "") => Err(EntityIdError::EmptyObjectId),
            (d, _) if d.contains("__") || !is_slug(d) => Err(EntityIdError::InvalidDomainChars),
            (_, o) if !is_slug(o) => Err(EntityIdError::InvalidObjectIdChars),
            _ => Ok(EntityId { domain, object_id }),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

pub fn valid_entity_id(entity_id: &str) -> bool {
    EntityId::from_str(entity_id).is_ok()
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(domain), Some(object_id), None) => EntityId::new(domain, object_id),
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        EntityId::from_str(&s)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_into_parts() {
        let id: EntityId = "sensor.phone_battery".parse().unwrap();
        assert_eq!((id.domain(), id.object_id()), ("sensor", "phone_battery"));
        assert_eq!(id.to_string(), "sensor.phone_battery");
    }

    #[test]
    fn test_rejected_ids() {
        let cases = [
            ("sensor", EntityIdError::InvalidFormat),
            ("sensor.phone.battery", EntityIdError::InvalidFormat),
            (".battery", EntityIdError::EmptyDomain),
            ("sensor.", EntityIdError::EmptyObjectId),
            ("_sensor.phone", EntityIdError::InvalidDomainChars),
            ("my__sensor.phone", EntityIdError::InvalidDomainChars),
            ("Sensor.phone", EntityIdError::InvalidDomainChars),
            ("sensor.phone_", EntityIdError::InvalidObjectIdChars),
            ("sensor.phone battery", EntityIdError::InvalidObjectIdChars),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<EntityId>().unwrap_err(), expected, "{input}");
        }
    }

    #[test]
    fn test_object_id_may_double_underscores() {
        assert!(valid_entity_id("sensor.phone__battery"));
    }

    #[test]
    fn test_serialized_as_string() {
        let id = EntityId::new("sensor", "phone").unwrap();
        assert_eq!(serde_json::to_value(&id).unwrap(), "sensor.phone");
        let back: EntityId = serde_json::from_value(serde_json::json!("sensor.phone")).unwrap();
        assert_eq!(back, id);
    }
}
