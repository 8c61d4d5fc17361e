//! Events: immutable facts delivered through the bus.
//!
//! An [`Event`] is a topic string plus a structured payload. The payload
//! shape depends on the topic; the engine never interprets it beyond what
//! accessors and predicates read out of it. Events are immutable once
//! created and cheap to share (`Arc<Event>` is the dispatch currency).
//!
//! # Context
//!
//! Every event carries an [`EventContext`]: a wall-clock `fired_at` stamp and
//! an optional `origin` linking it to the event that caused it. Context is
//! transport-level metadata; payloads stay clean.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// Unique event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new random event id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Causality metadata attached to every event.
#[derive(Debug, Clone, Serialize)]
pub struct EventContext {
    /// The event that caused this one, if any.
    pub origin: Option<EventId>,
    /// Wall-clock time the event was created.
    pub fired_at: DateTime<Utc>,
}

impl EventContext {
    /// Create a fresh context with no origin.
    pub fn new() -> Self {
        Self {
            origin: None,
            fired_at: Utc::now(),
        }
    }

    /// Create a context linked to the event that caused this one.
    pub fn from_origin(origin: EventId) -> Self {
        Self {
            origin: Some(origin),
            fired_at: Utc::now(),
        }
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable fact: a topic plus a structured payload.
///
/// # Example
///
/// ```ignore
/// use serde_json::json;
///
/// let event = Event::new(
///     "state_changed",
///     json!({
///         "entity_id": "light.kitchen",
///         "old_state": { "state": "off", "attributes": {} },
///         "new_state": { "state": "on", "attributes": { "brightness": 255 } },
///     }),
/// );
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Unique id for this event.
    pub id: EventId,
    /// Topic classifying the kind of event.
    pub topic: String,
    /// Structured payload; shape depends on the topic.
    pub payload: Value,
    /// Causality metadata.
    pub context: EventContext,
}

impl Event {
    /// Create a new event with a fresh context.
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id: EventId::new(),
            topic: topic.into(),
            payload,
            context: EventContext::new(),
        }
    }

    /// Create a new event caused by another event.
    pub fn with_origin(topic: impl Into<String>, payload: Value, origin: EventId) -> Self {
        Self {
            id: EventId::new(),
            topic: topic.into(),
            payload,
            context: EventContext::from_origin(origin),
        }
    }

    /// Convenience constructor for a state-transition event.
    ///
    /// `old` and `new` are full state objects in the canonical
    /// `{ state, attributes }` shape; the payload becomes
    /// `{ entity_id, old_state, new_state }`.
    pub fn state_change(entity_id: impl Into<String>, old: Value, new: Value) -> Self {
        Self::new(
            topics::STATE_CHANGED,
            json!({
                "entity_id": entity_id.into(),
                "old_state": old,
                "new_state": new,
            }),
        )
    }

    /// Read a top-level payload field.
    ///
    /// Returns `None` when the payload is not an object or the field is
    /// absent; reading never fails.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.as_object().and_then(|map| map.get(name))
    }
}

/// Well-known topic names.
pub mod topics {
    /// A state transition on some entity.
    pub const STATE_CHANGED: &str = "state_changed";
    /// A service was invoked.
    pub const SERVICE_CALLED: &str = "service_called";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_reads_top_level_payload() {
        let event = Event::new("test", json!({ "a": 1, "b": "two" }));
        assert_eq!(event.field("a"), Some(&json!(1)));
        assert_eq!(event.field("b"), Some(&json!("two")));
        assert_eq!(event.field("missing"), None);
    }

    #[test]
    fn field_on_non_object_payload_is_none() {
        let event = Event::new("test", json!("scalar"));
        assert_eq!(event.field("anything"), None);
    }

    #[test]
    fn state_change_has_canonical_shape() {
        let event = Event::state_change(
            "light.kitchen",
            json!({ "state": "off", "attributes": {} }),
            json!({ "state": "on", "attributes": {} }),
        );
        assert_eq!(event.topic, topics::STATE_CHANGED);
        assert_eq!(event.field("entity_id"), Some(&json!("light.kitchen")));
        assert_eq!(event.payload["old_state"]["state"], json!("off"));
        assert_eq!(event.payload["new_state"]["state"], json!("on"));
    }

    #[test]
    fn origin_links_events() {
        let first = Event::new("test", json!({}));
        let second = Event::with_origin("test", json!({}), first.id);
        assert_eq!(second.context.origin, Some(first.id));
        assert!(first.context.origin.is_none());
    }

    #[test]
    fn event_ids_are_unique() {
        let a = Event::new("test", json!({}));
        let b = Event::new("test", json!({}));
        assert_ne!(a.id, b.id);
    }
}
