//! Value accessors: pure reads out of an event's structured payload.
//!
//! An [`Accessor`] names one value inside an event: the new state, an
//! attribute of the old state, the entity identifier, and so on. Reading
//! returns `None` as the documented missing-value sentinel; it never panics
//! and never errors. Both the predicate evaluator and the parameter
//! extractor resolve values through this table, so "missing" means the same
//! thing everywhere.

use serde_json::Value;

use crate::event::Event;

/// Which side of a state transition to read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSide {
    /// The state before the transition (`old_state`).
    Old,
    /// The state after the transition (`new_state`).
    New,
}

impl StateSide {
    fn payload_key(self) -> &'static str {
        match self {
            StateSide::Old => "old_state",
            StateSide::New => "new_state",
        }
    }
}

/// A named read into an event payload.
///
/// Accessors are pure: reading the same accessor against the same event
/// always yields the same value and touches no shared state.
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    /// The `state` value of the new state.
    NewState,
    /// The `state` value of the old state.
    OldState,
    /// The entity identifier (`entity_id` payload field).
    EntityId,
    /// The domain part of the entity identifier (`light.kitchen` → `light`).
    Domain,
    /// The service name (`service` payload field).
    Service,
    /// The event topic.
    Topic,
    /// The event context (origin id and fired-at stamp) as a structured value.
    Context,
    /// A named attribute of the old or new state.
    Attribute {
        /// Which side of the transition to read.
        side: StateSide,
        /// The attribute name.
        name: String,
    },
}

impl Accessor {
    /// Read the value this accessor names out of `event`.
    ///
    /// `None` is the missing-value sentinel: absent fields, non-object
    /// payloads, and entity ids without a domain separator all read as
    /// missing rather than failing.
    pub fn read(&self, event: &Event) -> Option<Value> {
        match self {
            Accessor::NewState => state_value(event, StateSide::New).cloned(),
            Accessor::OldState => state_value(event, StateSide::Old).cloned(),
            Accessor::EntityId => event.field("entity_id").cloned(),
            Accessor::Domain => {
                // Service-call payloads carry `domain` directly; state
                // payloads derive it from the entity identifier.
                if let Some(domain) = event.field("domain") {
                    return Some(domain.clone());
                }
                let entity = event.field("entity_id")?.as_str()?;
                let (domain, _) = entity.split_once('.')?;
                Some(Value::String(domain.to_string()))
            }
            Accessor::Service => event.field("service").cloned(),
            Accessor::Topic => Some(Value::String(event.topic.clone())),
            Accessor::Context => serde_json::to_value(&event.context).ok(),
            Accessor::Attribute { side, name } => event
                .field(side.payload_key())?
                .get("attributes")?
                .get(name)
                .cloned(),
        }
    }

    /// Convenience constructor for a new-state attribute accessor.
    pub fn attr(name: impl Into<String>) -> Self {
        Accessor::Attribute {
            side: StateSide::New,
            name: name.into(),
        }
    }

    /// Convenience constructor for an old-state attribute accessor.
    pub fn old_attr(name: impl Into<String>) -> Self {
        Accessor::Attribute {
            side: StateSide::Old,
            name: name.into(),
        }
    }
}

fn state_value(event: &Event, side: StateSide) -> Option<&Value> {
    event.field(side.payload_key())?.get("state")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Event {
        Event::new(
            "state_changed",
            json!({
                "entity_id": "light.kitchen",
                "old_state": { "state": "off", "attributes": { "brightness": 0 } },
                "new_state": { "state": "on", "attributes": { "brightness": 255 } },
            }),
        )
    }

    #[test]
    fn reads_state_values() {
        let event = fixture();
        assert_eq!(Accessor::NewState.read(&event), Some(json!("on")));
        assert_eq!(Accessor::OldState.read(&event), Some(json!("off")));
    }

    #[test]
    fn reads_identifiers() {
        let event = fixture();
        assert_eq!(Accessor::EntityId.read(&event), Some(json!("light.kitchen")));
        assert_eq!(Accessor::Domain.read(&event), Some(json!("light")));
        assert_eq!(Accessor::Topic.read(&event), Some(json!("state_changed")));
    }

    #[test]
    fn reads_attributes_from_both_sides() {
        let event = fixture();
        assert_eq!(Accessor::attr("brightness").read(&event), Some(json!(255)));
        assert_eq!(Accessor::old_attr("brightness").read(&event), Some(json!(0)));
        assert_eq!(Accessor::attr("color").read(&event), None);
    }

    #[test]
    fn missing_values_are_sentinel_not_error() {
        let event = Event::new("state_changed", json!({}));
        assert_eq!(Accessor::NewState.read(&event), None);
        assert_eq!(Accessor::EntityId.read(&event), None);
        assert_eq!(Accessor::Domain.read(&event), None);
        assert_eq!(Accessor::attr("anything").read(&event), None);
    }

    #[test]
    fn domain_requires_separator() {
        let event = Event::new("state_changed", json!({ "entity_id": "nodomain" }));
        assert_eq!(Accessor::Domain.read(&event), None);
    }

    #[test]
    fn context_reads_as_structured_value() {
        let event = fixture();
        let ctx = Accessor::Context.read(&event).unwrap();
        assert!(ctx.get("fired_at").is_some());
        assert_eq!(ctx.get("origin"), Some(&Value::Null));
    }

    #[test]
    fn reads_are_idempotent() {
        let event = fixture();
        let first = Accessor::NewState.read(&event);
        let second = Accessor::NewState.read(&event);
        assert_eq!(first, second);
    }
}
