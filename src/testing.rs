//! Testing utilities for listeners and dispatch scenarios.
//!
//! Ergonomic helpers for exercising the engine in tests: canned event
//! builders, a recording outcome sink, and a latch for fan-out assertions.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! fanout = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ## Using canned events
//!
//! ```ignore
//! use fanout::testing::{state_event, service_event};
//!
//! dispatcher.dispatch(state_event("light.kitchen", "off", "on")).await;
//! dispatcher.dispatch(service_event("light", "turn_on")).await;
//! ```
//!
//! ## Using `RecordingSink`
//!
//! ```ignore
//! use fanout::testing::RecordingSink;
//!
//! let sink = RecordingSink::new();
//! let dispatcher = Dispatcher::builder().sink(sink.clone()).build();
//!
//! dispatcher.dispatch(state_event("light.kitchen", "off", "on")).await;
//! assert_eq!(sink.successes(), 1);
//! ```
//!
//! ## Using `DispatchLatch` for fan-out tests
//!
//! ```ignore
//! use fanout::testing::DispatchLatch;
//!
//! let latch = DispatchLatch::new(3);  // Expect 3 invocations
//! // ... handlers call latch.dec() ...
//! latch.await_zero().await;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use crate::event::Event;
use crate::outcome::{DispatchOutcome, OutcomeSink};

/// Build a `state_changed` event with bare states and no attributes.
pub fn state_event(entity_id: &str, old: &str, new: &str) -> Event {
    Event::state_change(
        entity_id,
        json!({ "state": old, "attributes": {} }),
        json!({ "state": new, "attributes": {} }),
    )
}

/// Build a `state_changed` event with attributes on the new state.
pub fn state_event_with_attrs(
    entity_id: &str,
    old: &str,
    new: &str,
    attributes: serde_json::Value,
) -> Event {
    Event::state_change(
        entity_id,
        json!({ "state": old, "attributes": {} }),
        json!({ "state": new, "attributes": attributes }),
    )
}

/// Build a `service_called` event.
pub fn service_event(domain: &str, service: &str) -> Event {
    Event::new(
        crate::event::topics::SERVICE_CALLED,
        json!({ "domain": domain, "service": service, "data": {} }),
    )
}

/// An [`OutcomeSink`] that keeps every outcome in memory.
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    outcomes: Arc<Mutex<Vec<DispatchOutcome>>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every outcome recorded so far.
    pub fn outcomes(&self) -> Vec<DispatchOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    /// Total outcomes recorded.
    pub fn len(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().unwrap().is_empty()
    }

    /// Number of successful outcomes.
    pub fn successes(&self) -> usize {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.status.is_success())
            .count()
    }

    /// Number of non-successful outcomes.
    pub fn failures(&self) -> usize {
        self.len() - self.successes()
    }
}

#[async_trait]
impl OutcomeSink for RecordingSink {
    async fn record(&self, outcome: DispatchOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}

/// A countdown latch for asserting on fan-out.
///
/// Handlers call [`dec`](DispatchLatch::dec); the test awaits
/// [`await_zero`](DispatchLatch::await_zero).
#[derive(Debug, Clone)]
pub struct DispatchLatch {
    remaining: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl DispatchLatch {
    /// Create a latch expecting `count` decrements.
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(count)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Decrement the latch. Saturates at zero.
    pub fn dec(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous <= 1 {
            self.notify.notify_waiters();
        }
    }

    /// Current count.
    pub fn count(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Wait until the count reaches zero.
    pub async fn await_zero(&self) {
        loop {
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.notify.notified();
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::DispatchStatus;
    use crate::registry::{ListenerId, OwnerId};
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn recording_sink_counts_by_status() {
        let sink = RecordingSink::new();
        for status in [
            DispatchStatus::Success,
            DispatchStatus::HandlerError {
                message: "boom".into(),
            },
        ] {
            sink.record(DispatchOutcome {
                listener: ListenerId::new(),
                owner: OwnerId::from("automation.test"),
                topic: "state_changed".to_string(),
                started_at: Utc::now(),
                duration: Duration::ZERO,
                status,
            })
            .await;
        }

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.successes(), 1);
        assert_eq!(sink.failures(), 1);
    }

    #[tokio::test]
    async fn latch_releases_at_zero() {
        let latch = DispatchLatch::new(2);
        let waiter = latch.clone();
        let handle = tokio::spawn(async move { waiter.await_zero().await });

        latch.dec();
        assert_eq!(latch.count(), 1);
        latch.dec();
        handle.await.unwrap();

        // Saturates, never underflows.
        latch.dec();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn canned_events_have_expected_shape() {
        let event = state_event("light.kitchen", "off", "on");
        assert_eq!(event.topic, "state_changed");
        assert_eq!(event.field("entity_id"), Some(&json!("light.kitchen")));

        let event = service_event("light", "turn_on");
        assert_eq!(event.topic, "service_called");
        assert_eq!(event.field("service"), Some(&json!("turn_on")));
    }
}
