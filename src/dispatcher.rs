//! The dispatcher: fans each event out to matching listeners with failure
//! isolation.
//!
//! # Dispatch pass
//!
//! For every ingested event the dispatcher takes a registry snapshot for the
//! event's topic and walks it in registration order:
//!
//! 1. identifier filter, then predicates (short-circuit AND); a non-match
//!    skips the listener silently;
//! 2. the rate gate: a throttled drop or debounce re-arm produces no
//!    invocation and no outcome record;
//! 3. invocation: exactly one [`DispatchOutcome`] per attempt, whatever
//!    happens inside the handler.
//!
//! Handler errors and panics are contained to their own (event, listener)
//! attempt. Non-blocking handlers are awaited in place; blocking handlers
//! are spawned onto the blocking pool the moment the pass reaches them and
//! complete independently, so a slow blocking handler never delays delivery
//! to the listeners after it or the processing of later events.
//!
//! # Shutdown
//!
//! [`Dispatcher::shutdown`] cancels the token shared with the timer
//! service: the run loop exits, pending debounce timers unwind without
//! firing, and attempts that have not started yet are recorded `Cancelled`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Interrupted;
use crate::event::Event;
use crate::handler::{Handler, HandlerArgs};
use crate::predicate::Predicate;
use crate::outcome::{DispatchOutcome, DispatchStatus, NullSink, OutcomeSink};
use crate::rate::{RateGate, RateMode, TimerService, TokioTimers};
use crate::registry::{Listener, ListenerId, ListenerRegistry};

struct Inner {
    registry: ListenerRegistry,
    sink: Arc<dyn OutcomeSink>,
    timers: Arc<dyn TimerService>,
    gate: RateGate,
    shutdown: CancellationToken,
}

/// Fans events out to matching listeners.
///
/// Cheap to clone; clones share the registry, the outcome sink, and the
/// shutdown token.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// Configures a [`Dispatcher`].
pub struct DispatcherBuilder {
    registry: ListenerRegistry,
    sink: Arc<dyn OutcomeSink>,
    timers: Option<Arc<dyn TimerService>>,
}

impl DispatcherBuilder {
    /// Use an existing registry instead of a fresh one.
    pub fn registry(mut self, registry: ListenerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Receive one [`DispatchOutcome`] per attempted invocation.
    pub fn sink(mut self, sink: impl OutcomeSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Back the debounce clock with an external scheduler.
    ///
    /// External timers are not tied to the dispatcher's shutdown token; the
    /// dispatcher still cancels their handles at shutdown.
    pub fn timers(mut self, timers: impl TimerService) -> Self {
        self.timers = Some(Arc::new(timers));
        self
    }

    /// Finish construction.
    pub fn build(self) -> Dispatcher {
        let shutdown = CancellationToken::new();
        let timers = self
            .timers
            .unwrap_or_else(|| Arc::new(TokioTimers::new(shutdown.clone())));
        Dispatcher {
            inner: Arc::new(Inner {
                registry: self.registry,
                sink: self.sink,
                timers,
                gate: RateGate::new(),
                shutdown,
            }),
        }
    }
}

impl Dispatcher {
    /// Start building a dispatcher. Defaults: fresh registry, [`NullSink`],
    /// tokio-backed timers.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder {
            registry: ListenerRegistry::new(),
            sink: Arc::new(NullSink),
            timers: None,
        }
    }

    /// A dispatcher with all defaults.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// The shared listener registry.
    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    /// Whether shutdown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Begin shutdown: the run loop exits, pending debounce timers are
    /// cancelled, and not-yet-started attempts are recorded `Cancelled`.
    ///
    /// Idempotent. In-flight handler invocations run to completion.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            debug!("dispatcher shutting down");
            self.inner.shutdown.cancel();
        }
        self.inner.gate.cancel_all();
    }

    /// Run one full dispatch pass for `event`.
    ///
    /// Non-blocking attempts complete before this returns. Blocking attempts
    /// are spawned onto the blocking pool as the pass reaches them and
    /// record their outcomes when they finish; the pass never waits on them.
    /// Once-listeners are removed before this returns either way.
    pub async fn dispatch(&self, event: Event) {
        let event = Arc::new(event);
        let snapshot = self.inner.registry.snapshot(&event.topic).await;
        trace!(
            event = %event.id,
            topic = %event.topic,
            candidates = snapshot.len(),
            "dispatch pass"
        );

        let mut consumed: Vec<ListenerId> = Vec::new();

        for listener in snapshot {
            if !listener.filter.matches(&event) {
                continue;
            }
            if !Predicate::eval_all(&listener.predicates, &event) {
                continue;
            }

            match listener.rate {
                Some(RateMode::Throttle(interval)) => {
                    if !self.inner.gate.throttle_open(listener.id, interval) {
                        trace!(listener = %listener.id, "throttled, event dropped");
                        continue;
                    }
                    self.inner.gate.mark_fired(listener.id);
                }
                Some(RateMode::Debounce(interval)) => {
                    self.arm_debounce(&listener, &event, interval);
                    continue;
                }
                None => {}
            }

            if listener.once {
                consumed.push(listener.id);
            }

            match &listener.handler {
                Handler::NonBlocking(_) => {
                    self.attempt(&listener, &event).await;
                }
                Handler::Blocking(_) => {
                    let this = self.clone();
                    let listener = Arc::clone(&listener);
                    let event = Arc::clone(&event);
                    tokio::spawn(async move {
                        this.attempt(&listener, &event).await;
                    });
                }
            }
        }

        for id in consumed {
            self.inner.registry.unregister(id).await;
            self.inner.gate.release(id);
        }
    }

    /// Consume events from `rx` until shutdown or the channel closes.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<Event>) {
        debug!("dispatcher loop started");
        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
        }
        self.inner.gate.cancel_all();
        debug!("dispatcher loop stopped");
    }

    fn arm_debounce(&self, listener: &Arc<Listener>, event: &Arc<Event>, interval: Duration) {
        let this = self.clone();
        let id = listener.id;
        let event = Arc::clone(event);
        let generation = self.inner.gate.advance_generation(id);
        let handle = self.inner.timers.schedule_once(
            interval,
            Box::new(move || {
                tokio::spawn(async move {
                    this.fire_debounced(id, generation, event).await;
                });
            }),
        );
        self.inner.gate.arm_debounce(id, generation, handle);
    }

    /// A debounce timer elapsed: invoke with the last-seen event, if the
    /// listener is still registered.
    ///
    /// `generation` identifies the arming this fire belongs to; a re-arm
    /// that raced the fire keeps its own pending handle.
    async fn fire_debounced(self, id: ListenerId, generation: u64, event: Arc<Event>) {
        self.inner.gate.clear_pending(id, generation);
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let Some(listener) = self.inner.registry.get(id).await else {
            // Unregistered between arming and firing.
            self.inner.gate.release(id);
            return;
        };
        self.attempt(&listener, &event).await;
        if listener.once {
            self.inner.registry.unregister(id).await;
            self.inner.gate.release(id);
        }
    }

    /// One invocation attempt: extract, invoke, classify, record.
    ///
    /// Exactly one outcome reaches the sink per call.
    async fn attempt(&self, listener: &Arc<Listener>, event: &Arc<Event>) {
        let started_at = Utc::now();
        let start = Instant::now();

        let status = if self.inner.shutdown.is_cancelled() {
            DispatchStatus::Cancelled
        } else {
            match listener.params.extract(event) {
                Err(missing) => {
                    warn!(
                        listener = %listener.id,
                        parameter = %missing.parameter,
                        "required value missing, invocation abandoned"
                    );
                    DispatchStatus::DependencyFailure {
                        parameter: missing.parameter,
                    }
                }
                Ok(args) => self.invoke(listener, args).await,
            }
        };

        if let DispatchStatus::HandlerError { message } = &status {
            warn!(listener = %listener.id, error = %message, "handler failed");
        }

        let outcome = DispatchOutcome {
            listener: listener.id,
            owner: listener.owner.clone(),
            topic: event.topic.clone(),
            started_at,
            duration: start.elapsed(),
            status,
        };
        self.inner.sink.record(outcome).await;
    }

    async fn invoke(&self, listener: &Arc<Listener>, args: HandlerArgs) -> DispatchStatus {
        match &listener.handler {
            Handler::NonBlocking(f) => {
                match std::panic::AssertUnwindSafe(f(args)).catch_unwind().await {
                    Ok(Ok(())) => DispatchStatus::Success,
                    Ok(Err(err)) => classify(err),
                    Err(payload) => DispatchStatus::HandlerError {
                        message: panic_message(payload.as_ref()),
                    },
                }
            }
            Handler::Blocking(f) => {
                let f = Arc::clone(f);
                match tokio::task::spawn_blocking(move || f(args)).await {
                    Ok(Ok(())) => DispatchStatus::Success,
                    Ok(Err(err)) => classify(err),
                    Err(join) if join.is_panic() => DispatchStatus::HandlerError {
                        message: panic_message(join.into_panic().as_ref()),
                    },
                    Err(_) => DispatchStatus::Cancelled,
                }
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("shut_down", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Sends events into a running dispatcher loop.
#[derive(Debug, Clone)]
pub struct BusHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl BusHandle {
    /// Create a handle and the receiver half to hand to [`Dispatcher::run`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event for dispatch. Returns `false` if the loop has exited.
    pub fn ingest(&self, event: Event) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                debug!("event dropped, dispatcher loop has exited");
                false
            }
        }
    }
}

fn classify(err: anyhow::Error) -> DispatchStatus {
    if err.downcast_ref::<Interrupted>().is_some() {
        DispatchStatus::Cancelled
    } else {
        DispatchStatus::HandlerError {
            message: format!("{err:#}"),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
