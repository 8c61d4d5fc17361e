//! Structured error types for the dispatch engine.
//!
//! # The Error Boundary Rule
//!
//! > **No handler error ever crosses the dispatch boundary.**
//!
//! - [`ConfigurationError`] is raised synchronously from registration and is
//!   the caller's responsibility; it is never deferred to dispatch time.
//! - Everything a handler does wrong at dispatch time is contained to that
//!   single (event, listener) attempt and surfaces only as a
//!   [`DispatchStatus`](crate::outcome::DispatchStatus) on the outcome record.
//! - Shutdown is the one signal that is always propagated: a handler that
//!   returns [`Interrupted`] is classified `Cancelled`, never folded into a
//!   generic handler failure.

use thiserror::Error;

/// Invalid subscription configuration.
///
/// Raised synchronously from [`ListenerRegistry::register`] before anything
/// is added to the registry. A listener that registers successfully will
/// never fail for configuration reasons at dispatch time.
///
/// [`ListenerRegistry::register`]: crate::registry::ListenerRegistry::register
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Both `debounce` and `throttle` were supplied.
    #[error("debounce and throttle are mutually exclusive")]
    ConflictingRateOptions,

    /// A debounce or throttle interval of zero was supplied.
    #[error("{kind} interval must be non-zero")]
    ZeroInterval {
        /// Which option carried the zero interval (`"debounce"` or `"throttle"`).
        kind: &'static str,
    },

    /// A handler parameter was declared positional-only.
    ///
    /// Every parameter must be addressable by name so its extractor can be
    /// resolved at registration time.
    #[error("parameter `{name}` is positional-only; handler parameters must be named")]
    PositionalOnlyParameter {
        /// The offending parameter name.
        name: String,
    },

    /// A handler declared a variadic positional capture.
    #[error("parameter `{name}` is a variadic positional capture, which is not supported")]
    VariadicParameter {
        /// The offending parameter name.
        name: String,
    },

    /// Two parameters share the same name.
    #[error("duplicate parameter `{name}`")]
    DuplicateParameter {
        /// The duplicated name.
        name: String,
    },

    /// A parameter was declared with an empty name.
    #[error("parameter name must not be empty")]
    EmptyParameterName,

    /// A subscription-time constant collides with a declared parameter.
    #[error("constant `{name}` shadows a declared parameter")]
    ConstantShadowsParameter {
        /// The colliding name.
        name: String,
    },
}

/// Marker error for shutdown-interrupted work.
///
/// Handlers that observe shutdown mid-flight should propagate this (e.g.
/// `return Err(Interrupted.into())`). The dispatcher classifies it as
/// `Cancelled` instead of `HandlerError`, so shutdown is never mistaken for
/// listener misbehavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("dispatch interrupted by shutdown")]
pub struct Interrupted;
