//! # Fanout
//!
//! An in-process, topic-based event dispatch engine: listeners subscribe to
//! topics with composable filters, predicates, and rate control, and declare
//! exactly the event data their handlers consume.
//!
//! ## Core Concepts
//!
//! Fanout separates **matching** from **invocation**:
//! - [`Event`] = an immutable fact on a topic, with a JSON payload
//! - [`Listener`] = topic + filter + predicates + rate gate + handler
//!
//! The key principle: **one attempted invocation = one outcome record**.
//! Whatever a handler does (succeed, fail, panic), the failure stays inside
//! its own (event, listener) attempt.
//!
//! ## Architecture
//!
//! ```text
//! Producers
//!     │
//!     ▼ ingest()
//! BusHandle ──► Dispatcher.run() loop
//!                   │
//!                   ▼ snapshot(topic)
//!              ListenerRegistry
//!                   │
//!     ┌─────────────┼──────────────┐
//!     ▼             ▼              ▼
//! Listener A    Listener B     Listener C
//!     │             │              │
//!  filter ✗     predicates ✓   throttle closed
//!  (skipped)        │          (dropped)
//!                   ▼
//!             rate gate open
//!                   │
//!                   ▼ extract params
//!             Handler (async | blocking pool)
//!                   │
//!                   ▼
//!             DispatchOutcome ──► OutcomeSink
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Events are facts** - Immutable once ingested, shared by reference
//! 2. **Registration order is invocation order** - Per dispatch pass
//! 3. **Failure isolation** - No handler error crosses the dispatch boundary
//! 4. **Exactly one outcome per attempt** - Rate-gated drops produce none
//! 5. **Eager validation** - Bad subscriptions fail at registration, never
//!    at dispatch time
//! 6. **The registry lock is never held across a handler invocation**
//!
//! ## Example
//!
//! ```ignore
//! use fanout::{
//!     BusHandle, Dispatcher, Event, Handler, Injectable, ListenerSpec, ParamSpec, Predicate,
//! };
//! use std::time::Duration;
//!
//! let dispatcher = Dispatcher::new();
//!
//! dispatcher
//!     .registry()
//!     .register(
//!         ListenerSpec::builder("automation.motion_lights", "state_changed")
//!             .entity("binary_sensor.hallway_*")
//!             .predicate(Predicate::changed_to("on"))
//!             .param(ParamSpec::inject("entity_id", Injectable::EntityId))
//!             .debounce(Duration::from_secs(2))
//!             .handler(Handler::non_blocking(|args| async move {
//!                 println!("motion at {:?}", args.value("entity_id"));
//!                 Ok(())
//!             })),
//!     )
//!     .await?;
//!
//! let (bus, events) = BusHandle::channel();
//! tokio::spawn(dispatcher.clone().run(events));
//!
//! bus.ingest(Event::state_change(
//!     "binary_sensor.hallway_door",
//!     serde_json::json!({ "state": "off", "attributes": {} }),
//!     serde_json::json!({ "state": "on", "attributes": {} }),
//! ));
//! ```
//!
//! ## What This Is Not
//!
//! Fanout is **not**:
//! - An event store (nothing is persisted or replayed)
//! - A cross-process message broker
//! - A scheduler (debounce timers are the only clocks it owns)
//!
//! Fanout **is**:
//! > An in-process dispatch engine where subscriptions declare what they
//! > match, what they receive, and how often they fire.

// Core modules
mod accessor;
mod dispatcher;
mod error;
mod event;
mod extract;
mod handler;
mod outcome;
mod pattern;
mod predicate;
mod rate;
mod registry;

// Testing utilities (feature-gated, also available to the crate's own tests)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Stress tests (test-only)
#[cfg(test)]
mod stress_tests;

// Re-export event types
pub use event::{topics, Event, EventContext, EventId};

// Re-export matching types
pub use accessor::{Accessor, StateSide};
pub use pattern::{EntityFilter, GlobPattern};
pub use predicate::{CheckFn, CompareOp, FieldCondition, GuardFn, Predicate};

// Re-export extraction types
pub use extract::{Injectable, ParamKind, ParamSpec, ParamStyle, ParamTable};

// Re-export handler types
pub use handler::{ArgValue, Handler, HandlerArgs};

// Re-export registry types
pub use registry::{
    Listener, ListenerBuilder, ListenerId, ListenerRegistry, ListenerSpec, OwnerId, Subscription,
};

// Re-export rate-control types
pub use rate::{RateMode, TimerCallback, TimerHandle, TimerService, TokioTimers};

// Re-export outcome types
pub use outcome::{ChannelSink, DispatchOutcome, DispatchStatus, NullSink, OutcomeSink};

// Re-export dispatcher types (primary entry point)
pub use dispatcher::{BusHandle, Dispatcher, DispatcherBuilder};

// Re-export error types
pub use error::{ConfigurationError, Interrupted};

// Re-export commonly used external types
pub use async_trait::async_trait;
