//! Causality of events and state writes

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies the action behind an event
///
/// A derived sensor writes its state under a child of the context of the
/// source change, so a reader can follow a write back to its cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            id: Ulid::new().to_string(),
            user_id: None,
            parent_id: None,
        }
    }

    /// Fresh context caused by this one; the user carries over
    pub fn child(&self) -> Self {
        Context {
            parent_id: Some(self.id.clone()),
            user_id: self.user_id.clone(),
            ..Context::new()
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_points_at_parent() {
        let mut parent = Context::new();
        parent.user_id = Some("owner".to_string());

        let child = parent.child();
        assert_ne!(child.id, parent.id);
        assert_eq!(child.parent_id.as_ref(), Some(&parent.id));
        assert_eq!(child.user_id.as_deref(), Some("owner"));
    }

    #[test]
    fn test_serialized_without_empty_links() {
        let json = serde_json::to_value(Context::new()).unwrap();
        assert!(json.get("parent_id").is_none());
        assert!(json.get("user_id").is_none());
    }
}
