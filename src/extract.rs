//! Declarative parameter extraction: handlers receive only the typed data
//! they declare.
//!
//! Each handler parameter is declared as a [`ParamSpec`] and resolved once,
//! at subscription time, into the [`ParamTable`]. There is no reflection: an
//! [`Injectable`] marker is a typed tag bound to one pure extractor in a
//! single explicit table ([`Injectable::extract`]).
//!
//! Validation is eager: bad signatures fail registration with a
//! [`ConfigurationError`], never at dispatch time. At dispatch time the only
//! possible failure is a *required* value reading as missing, which abandons
//! that single invocation as a dependency failure.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::accessor::{Accessor, StateSide};
use crate::error::ConfigurationError;
use crate::event::Event;
use crate::handler::{ArgValue, HandlerArgs};
use std::sync::Arc;

/// A typed tag binding a handler parameter to one pure extractor.
#[derive(Debug, Clone, PartialEq)]
pub enum Injectable {
    /// The new state value.
    NewState,
    /// The old state value.
    OldState,
    /// The entity identifier.
    EntityId,
    /// The domain.
    Domain,
    /// The service name.
    Service,
    /// The event context (origin, fired-at) as a structured value.
    Context,
    /// The full event (topic, payload, and context) as a structured value.
    TypedEvent,
    /// A named attribute of the old or new state.
    Attribute {
        /// Which side of the transition to read.
        side: StateSide,
        /// The attribute name.
        name: String,
    },
}

impl Injectable {
    /// The marker → extractor table. Pure; `None` is the missing-value
    /// sentinel.
    pub fn extract(&self, event: &Event) -> Option<Value> {
        match self {
            Injectable::NewState => Accessor::NewState.read(event),
            Injectable::OldState => Accessor::OldState.read(event),
            Injectable::EntityId => Accessor::EntityId.read(event),
            Injectable::Domain => Accessor::Domain.read(event),
            Injectable::Service => Accessor::Service.read(event),
            Injectable::Context => Accessor::Context.read(event),
            Injectable::TypedEvent => serde_json::to_value(event).ok(),
            Injectable::Attribute { side, name } => Accessor::Attribute {
                side: *side,
                name: name.clone(),
            }
            .read(event),
        }
    }

    /// Convenience constructor for a new-state attribute marker.
    pub fn attr(name: impl Into<String>) -> Self {
        Injectable::Attribute {
            side: StateSide::New,
            name: name.into(),
        }
    }

    /// Convenience constructor for an old-state attribute marker.
    pub fn old_attr(name: impl Into<String>) -> Self {
        Injectable::Attribute {
            side: StateSide::Old,
            name: name.into(),
        }
    }
}

/// How a parameter is declared in the handler signature.
///
/// Only [`Named`](ParamStyle::Named) parameters survive validation; the
/// other styles exist so signatures imported from foreign metadata can be
/// rejected with a precise error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// Addressable by name. The only accepted style.
    Named,
    /// Positional-only; rejected at registration.
    PositionalOnly,
    /// Variadic positional capture; rejected at registration.
    VariadicPositional,
}

/// What a parameter receives at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    /// The parameter needs no data; it receives nothing.
    NoValue,
    /// The raw event object.
    RawEvent,
    /// A value produced by an injectable marker's extractor.
    Inject(Injectable),
}

/// One declared handler parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Declaration style; non-`Named` styles are rejected.
    pub style: ParamStyle,
    /// What the parameter receives.
    pub kind: ParamKind,
    /// Whether a missing extracted value abandons the invocation.
    ///
    /// Optional parameters receive `null` when the value is missing.
    pub required: bool,
}

impl ParamSpec {
    /// A required injected parameter.
    pub fn inject(name: impl Into<String>, marker: Injectable) -> Self {
        Self {
            name: name.into(),
            style: ParamStyle::Named,
            kind: ParamKind::Inject(marker),
            required: true,
        }
    }

    /// An optional injected parameter (missing reads as `null`).
    pub fn optional(name: impl Into<String>, marker: Injectable) -> Self {
        Self {
            name: name.into(),
            style: ParamStyle::Named,
            kind: ParamKind::Inject(marker),
            required: false,
        }
    }

    /// A parameter receiving the raw event object.
    pub fn raw_event(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            style: ParamStyle::Named,
            kind: ParamKind::RawEvent,
            required: true,
        }
    }

    /// A parameter that needs no data.
    pub fn no_value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            style: ParamStyle::Named,
            kind: ParamKind::NoValue,
            required: false,
        }
    }

    /// Declare this spec positional-only (will be rejected at registration).
    pub fn positional_only(mut self) -> Self {
        self.style = ParamStyle::PositionalOnly;
        self
    }

    /// Declare this spec a variadic capture (will be rejected at registration).
    pub fn variadic(mut self) -> Self {
        self.style = ParamStyle::VariadicPositional;
        self
    }
}

/// A required parameter's extractor read the missing-value sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MissingValue {
    /// The parameter whose value could not be produced.
    pub parameter: String,
}

/// The resolved parameter table for one listener.
///
/// Built once at registration from the declared specs and subscription-time
/// constants; extraction at dispatch time walks the pre-resolved table.
#[derive(Debug, Clone)]
pub struct ParamTable {
    specs: Vec<ParamSpec>,
    constants: BTreeMap<String, Value>,
}

impl ParamTable {
    /// Resolve and validate a declared signature.
    ///
    /// Fails fast with a [`ConfigurationError`] on positional-only or
    /// variadic parameters, empty or duplicate names, and constants that
    /// shadow a declared parameter.
    pub fn resolve(
        specs: Vec<ParamSpec>,
        constants: BTreeMap<String, Value>,
    ) -> Result<Self, ConfigurationError> {
        let mut seen = std::collections::HashSet::new();
        for spec in &specs {
            if spec.name.is_empty() {
                return Err(ConfigurationError::EmptyParameterName);
            }
            match spec.style {
                ParamStyle::Named => {}
                ParamStyle::PositionalOnly => {
                    return Err(ConfigurationError::PositionalOnlyParameter {
                        name: spec.name.clone(),
                    })
                }
                ParamStyle::VariadicPositional => {
                    return Err(ConfigurationError::VariadicParameter {
                        name: spec.name.clone(),
                    })
                }
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigurationError::DuplicateParameter {
                    name: spec.name.clone(),
                });
            }
        }
        for name in constants.keys() {
            if seen.contains(name.as_str()) {
                return Err(ConfigurationError::ConstantShadowsParameter { name: name.clone() });
            }
        }
        Ok(Self { specs, constants })
    }

    /// An empty table: the handler declares no parameters.
    pub fn empty() -> Self {
        Self {
            specs: Vec::new(),
            constants: BTreeMap::new(),
        }
    }

    /// Number of declared parameters (constants excluded).
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the table declares no parameters.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Produce the argument set for one dispatch attempt.
    ///
    /// Walks the pre-resolved table in declaration order, then merges the
    /// subscription-time constants. A required parameter reading the
    /// missing-value sentinel abandons the attempt.
    pub(crate) fn extract(&self, event: &Arc<Event>) -> Result<HandlerArgs, MissingValue> {
        let mut args = Vec::with_capacity(self.specs.len() + self.constants.len());
        for spec in &self.specs {
            let value = match &spec.kind {
                ParamKind::NoValue => ArgValue::None,
                ParamKind::RawEvent => ArgValue::Event(Arc::clone(event)),
                ParamKind::Inject(marker) => match marker.extract(event) {
                    Some(value) => ArgValue::Value(value),
                    None if spec.required => {
                        return Err(MissingValue {
                            parameter: spec.name.clone(),
                        })
                    }
                    None => ArgValue::Value(Value::Null),
                },
            };
            args.push((spec.name.clone(), value));
        }
        for (name, value) in &self.constants {
            args.push((name.clone(), ArgValue::Value(value.clone())));
        }
        Ok(HandlerArgs::new(Arc::clone(event), args))
    }
}
