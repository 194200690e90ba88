//! Change notifications delivered by the datastore subscription.

use serde::{Deserialize, Serialize};

/// Operation type of a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Update,
    Remove,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Update => "update",
            Operation::Remove => "remove",
        }
    }
}

/// A single change notification for one object.
///
/// This is the fundamental unit consumed by a [`Listener`](crate::Listener).
/// Within one object type's stream, events arrive in datastore order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ChangeEvent<T> {
    Add { id: String, object: T },
    Update { id: String, before: T, after: T },
    Remove { id: String, object: T },
}

impl<T> ChangeEvent<T> {
    pub fn add(id: impl Into<String>, object: T) -> Self {
        ChangeEvent::Add {
            id: id.into(),
            object,
        }
    }

    pub fn update(id: impl Into<String>, before: T, after: T) -> Self {
        ChangeEvent::Update {
            id: id.into(),
            before,
            after,
        }
    }

    pub fn remove(id: impl Into<String>, object: T) -> Self {
        ChangeEvent::Remove {
            id: id.into(),
            object,
        }
    }

    /// Returns the key of the changed object.
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Add { id, .. }
            | ChangeEvent::Update { id, .. }
            | ChangeEvent::Remove { id, .. } => id,
        }
    }

    pub fn op(&self) -> Operation {
        match self {
            ChangeEvent::Add { .. } => Operation::Add,
            ChangeEvent::Update { .. } => Operation::Update,
            ChangeEvent::Remove { .. } => Operation::Remove,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_accessors() {
        let event = ChangeEvent::update("vpn-1", 1u32, 2u32);
        assert_eq!(event.id(), "vpn-1");
        assert_eq!(event.op(), Operation::Update);
        assert_eq!(event.op().as_str(), "update");
    }

    #[test]
    fn test_tagged_json() {
        let event: ChangeEvent<String> =
            serde_json::from_str(r#"{"op": "remove", "id": "k", "object": "v"}"#).unwrap();
        assert_eq!(event, ChangeEvent::remove("k", "v".to_string()));
    }
}
