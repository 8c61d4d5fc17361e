//! Dispatch outcomes: one record per attempted invocation.
//!
//! The engine performs no persistence itself. Every attempt that passes the
//! rate gate produces exactly one [`DispatchOutcome`], timed with a
//! monotonic clock and pushed to the configured [`OutcomeSink`]. Rate-gated
//! drops and debounce re-arms never reach invocation and produce no record.
//!
//! Sinks are fire-and-forget from the engine's point of view: a slow or
//! failing sink must do its own buffering, the dispatcher will not retry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::registry::{ListenerId, OwnerId};

/// Terminal classification of one (event, listener) attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    /// The handler completed without error.
    Success,
    /// The handler returned an error or panicked.
    HandlerError {
        /// Rendered error message for diagnostics.
        message: String,
    },
    /// A required injectable value could not be produced from the event.
    DependencyFailure {
        /// The parameter whose extractor read the missing-value sentinel.
        parameter: String,
    },
    /// Shutdown began before the invocation started, or the handler
    /// propagated the shutdown marker.
    Cancelled,
}

impl DispatchStatus {
    /// Whether the attempt completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchStatus::Success)
    }
}

/// One attempted invocation, classified and timed.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    /// The listener that was invoked.
    pub listener: ListenerId,
    /// The owner the listener belongs to.
    pub owner: OwnerId,
    /// The topic of the triggering event.
    pub topic: String,
    /// Wall-clock time the attempt started (for the record only; timing uses
    /// a monotonic clock).
    pub started_at: DateTime<Utc>,
    /// Monotonic elapsed time of the attempt.
    pub duration: Duration,
    /// Terminal classification.
    pub status: DispatchStatus,
}

/// Consumer of dispatch outcomes (metrics, persistence, aggregation).
#[async_trait]
pub trait OutcomeSink: Send + Sync + 'static {
    /// Receive one outcome record.
    ///
    /// Must not block for long; the dispatch pass awaits this call.
    async fn record(&self, outcome: DispatchOutcome);
}

/// Discards every outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl OutcomeSink for NullSink {
    async fn record(&self, outcome: DispatchOutcome) {
        trace!(listener = %outcome.listener, status = ?outcome.status, "outcome discarded");
    }
}

/// Forwards outcomes over an unbounded channel.
///
/// Useful for wiring the engine to an external aggregator task, and for
/// tests that assert on outcome streams.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DispatchOutcome>,
}

impl ChannelSink {
    /// Create a sink and the receiving half.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OutcomeSink for ChannelSink {
    async fn record(&self, outcome: DispatchOutcome) {
        // A dropped receiver means nobody is listening; that is not the
        // dispatcher's problem.
        let _ = self.tx.send(outcome);
    }
}
