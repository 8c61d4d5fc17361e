//! Composable boolean predicates evaluated against events.
//!
//! [`Predicate`] is a closed sum type with a single evaluator; there is no
//! open-ended dynamic dispatch. A bare list of predicates supplied at subscribe time is
//! an implicit AND and short-circuits on the first false predicate.
//!
//! Predicates are pure: evaluating the same predicate against the same event
//! is idempotent and side-effect-free. Guard functions are required to be
//! pure too; the short-circuit makes any observable guard side effect
//! unreliable by construction.
//!
//! # Example
//!
//! ```ignore
//! // "battery dropped below 20 on any sensor that was not off"
//! let predicate = Predicate::AnyOf(vec![
//!     Predicate::Not(Box::new(Predicate::state_from("off"))),
//!     Predicate::attr_to("battery", CompareOp::Lt, 20),
//! ]);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::accessor::Accessor;
use crate::event::Event;
use crate::pattern::GlobPattern;

/// A pure boolean test over an event.
pub type GuardFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// A pure boolean test over a single payload value.
pub type CheckFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Comparison operator for [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

/// One condition inside a [`Predicate::WhereMap`].
#[derive(Clone)]
pub enum FieldCondition {
    /// Field equals this literal.
    Equals(Value),
    /// Field is a string matching this glob pattern.
    Matches(GlobPattern),
    /// Field satisfies this pure check function.
    Check(CheckFn),
    /// Field must be present with any value.
    Present,
}

impl fmt::Debug for FieldCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldCondition::Equals(v) => f.debug_tuple("Equals").field(v).finish(),
            FieldCondition::Matches(p) => f.debug_tuple("Matches").field(&p.as_str()).finish(),
            FieldCondition::Check(_) => f.write_str("Check(..)"),
            FieldCondition::Present => f.write_str("Present"),
        }
    }
}

/// A composable boolean expression over events.
///
/// The variant set is closed; [`Predicate::eval`] is the single evaluator.
/// There is no `AllOf` variant because a predicate *list* is already an
/// implicit AND; the transition helpers compose conjunction out of
/// `Not`/`AnyOf` where they need it.
#[derive(Clone)]
pub enum Predicate {
    /// Logical negation.
    Not(Box<Predicate>),
    /// Logical OR; true if any branch is true. Empty is false.
    AnyOf(Vec<Predicate>),
    /// Compare an accessed value against a literal operand.
    ///
    /// Missing values and type-mismatched operands evaluate false, never
    /// error.
    Compare {
        /// What to read from the event.
        accessor: Accessor,
        /// How to compare it.
        op: CompareOp,
        /// The literal to compare against.
        operand: Value,
    },
    /// An arbitrary pure guard function.
    Guard {
        /// Name used in `Debug` output and logs.
        name: &'static str,
        /// The guard itself. Must be pure.
        f: GuardFn,
    },
    /// Per-field conditions on top-level payload fields, AND'ed together.
    WhereMap(BTreeMap<String, FieldCondition>),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Predicate::AnyOf(branches) => f.debug_tuple("AnyOf").field(branches).finish(),
            Predicate::Compare {
                accessor,
                op,
                operand,
            } => f
                .debug_struct("Compare")
                .field("accessor", accessor)
                .field("op", op)
                .field("operand", operand)
                .finish(),
            Predicate::Guard { name, .. } => f.debug_tuple("Guard").field(name).finish(),
            Predicate::WhereMap(map) => f.debug_tuple("WhereMap").field(map).finish(),
        }
    }
}

impl Predicate {
    /// Evaluate this predicate against an event.
    pub fn eval(&self, event: &Event) -> bool {
        match self {
            Predicate::Not(inner) => !inner.eval(event),
            Predicate::AnyOf(branches) => branches.iter().any(|p| p.eval(event)),
            Predicate::Compare {
                accessor,
                op,
                operand,
            } => match accessor.read(event) {
                Some(value) => compare_values(*op, &value, operand),
                None => false,
            },
            Predicate::Guard { f, .. } => f(event),
            Predicate::WhereMap(map) => map.iter().all(|(key, condition)| {
                let field = event.field(key);
                match condition {
                    FieldCondition::Present => field.is_some(),
                    FieldCondition::Equals(expected) => field == Some(expected),
                    FieldCondition::Matches(pattern) => field
                        .and_then(Value::as_str)
                        .is_some_and(|s| pattern.is_match(s)),
                    FieldCondition::Check(check) => field.is_some_and(|v| check(v)),
                }
            }),
        }
    }

    /// Evaluate a predicate list with AND semantics, short-circuiting on the
    /// first false predicate. An empty list is true.
    pub fn eval_all(predicates: &[Predicate], event: &Event) -> bool {
        predicates.iter().all(|p| p.eval(event))
    }

    /// Compare an accessed value against a literal.
    pub fn compare(accessor: Accessor, op: CompareOp, operand: impl Into<Value>) -> Self {
        Predicate::Compare {
            accessor,
            op,
            operand: operand.into(),
        }
    }

    /// New state equals `value`.
    pub fn state_to(value: impl Into<Value>) -> Self {
        Self::compare(Accessor::NewState, CompareOp::Eq, value)
    }

    /// Old state equals `value`.
    pub fn state_from(value: impl Into<Value>) -> Self {
        Self::compare(Accessor::OldState, CompareOp::Eq, value)
    }

    /// State changed to `value`: new state equals it and old state did not.
    pub fn changed_to(value: impl Into<Value>) -> Self {
        let value = value.into();
        // new == v AND old != v, composed as Not(AnyOf(...)) since the
        // variant set has no conjunction.
        Predicate::Not(Box::new(Predicate::AnyOf(vec![
            Predicate::Not(Box::new(Self::state_to(value.clone()))),
            Self::state_from(value),
        ])))
    }

    /// State changed from `value`: old state equals it and new state does not.
    pub fn changed_from(value: impl Into<Value>) -> Self {
        let value = value.into();
        Predicate::Not(Box::new(Predicate::AnyOf(vec![
            Predicate::Not(Box::new(Self::state_from(value.clone()))),
            Self::state_to(value),
        ])))
    }

    /// State value differs between old and new.
    ///
    /// Missing on either side counts as a change only if the other side is
    /// present.
    pub fn changed() -> Self {
        Predicate::Guard {
            name: "state_changed",
            f: Arc::new(|event| {
                let old = Accessor::OldState.read(event);
                let new = Accessor::NewState.read(event);
                old != new
            }),
        }
    }

    /// Compare a new-state attribute against a literal.
    pub fn attr_to(name: impl Into<String>, op: CompareOp, operand: impl Into<Value>) -> Self {
        Self::compare(Accessor::attr(name), op, operand)
    }

    /// Compare an old-state attribute against a literal.
    pub fn attr_from(name: impl Into<String>, op: CompareOp, operand: impl Into<Value>) -> Self {
        Self::compare(Accessor::old_attr(name), op, operand)
    }

    /// A named pure guard function.
    pub fn guard(name: &'static str, f: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        Predicate::Guard {
            name,
            f: Arc::new(f),
        }
    }

    /// Per-field conditions on top-level payload fields.
    pub fn where_map<I, K>(conditions: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldCondition)>,
        K: Into<String>,
    {
        Predicate::WhereMap(
            conditions
                .into_iter()
                .map(|(k, c)| (k.into(), c))
                .collect(),
        )
    }
}

/// Compare two payload values under `op`.
///
/// Numbers compare numerically (so `20` and `20.0` are equal), strings
/// lexicographically. `Eq`/`Ne` fall back to structural equality for other
/// types; ordering on non-comparable types is false.
fn compare_values(op: CompareOp, left: &Value, right: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    };

    match (op, ordering) {
        (CompareOp::Eq, Some(ord)) => ord == Ordering::Equal,
        (CompareOp::Ne, Some(ord)) => ord != Ordering::Equal,
        (CompareOp::Eq, None) => left == right,
        (CompareOp::Ne, None) => left != right,
        (CompareOp::Lt, Some(ord)) => ord == Ordering::Less,
        (CompareOp::Le, Some(ord)) => ord != Ordering::Greater,
        (CompareOp::Gt, Some(ord)) => ord == Ordering::Greater,
        (CompareOp::Ge, Some(ord)) => ord != Ordering::Less,
        (_, None) => false,
    }
}
