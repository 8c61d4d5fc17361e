//! Per-listener rate control: throttle and debounce state machines.
//!
//! The rate gate decides whether a matched event actually triggers an
//! invocation:
//!
//! - **Throttle(T)**: proceed only if at least `T` has elapsed since the last
//!   invocation (monotonic clock); otherwise the event is dropped for that
//!   listener: not queued, not retried, no error.
//! - **Debounce(T)**: each matching event cancels any pending timer and arms
//!   a new one `T` in the future carrying that event; only the last event of
//!   a burst fires, after `T` of silence. Re-arm is always "cancel previous
//!   handle, schedule new one"; there is no implicit timer state.
//!
//! Rate state is a side table keyed by listener id, owned by the dispatcher.
//! The shared listener record stays immutable; only the gate touches this
//! table, and only from the single dispatch pass handling that listener.
//!
//! Timers go through the [`TimerService`] seam so the debounce clock can be
//! supplied by an external scheduler. [`TokioTimers`] is the default.

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::registry::ListenerId;

/// Rate-control mode for one listener.
///
/// The registry derives this from the mutually exclusive `debounce`/
/// `throttle` options at registration; `once` is orthogonal and handled by
/// the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMode {
    /// Drop events arriving within `Duration` of the last invocation.
    Throttle(Duration),
    /// Defer invocation until `Duration` of silence; fire with the last event.
    Debounce(Duration),
}

/// Callback invoked when a scheduled timer elapses.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// A cancellable handle to a scheduled timer.
///
/// Cancellation is idempotent; cancelling an already-fired timer is a no-op.
pub struct TimerHandle {
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl TimerHandle {
    /// Wrap a cancellation routine.
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Cancel the timer. The callback will not run after this returns.
    pub fn cancel(&self) {
        (self.cancel)();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimerHandle")
    }
}

/// One-shot timer scheduling seam.
///
/// The engine only needs `schedule_once` + handle cancellation; any external
/// scheduler exposing that shape can back the debounce clock.
pub trait TimerService: Send + Sync + 'static {
    /// Run `callback` after `delay`, unless the handle is cancelled first.
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Default [`TimerService`] backed by `tokio::time`.
///
/// Every timer is a task selecting between its deadline and a child of the
/// supplied shutdown token, so pending timers unwind silently at shutdown.
#[derive(Debug, Clone)]
pub struct TokioTimers {
    shutdown: CancellationToken,
}

impl TokioTimers {
    /// Create a timer service whose timers abort when `shutdown` fires.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

impl TimerService for TokioTimers {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let token = self.shutdown.child_token();
        let timer_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => callback(),
                () = timer_token.cancelled() => {}
            }
        });
        TimerHandle::new(move || token.cancel())
    }
}

#[derive(Default)]
struct RateState {
    last_fired: Option<Instant>,
    pending: Option<TimerHandle>,
    generation: u64,
}

/// Per-listener rate-control state table.
///
/// Keyed by listener id; ids are never reused, so a stale entry for a
/// removed listener is inert. Entries are released explicitly when the
/// dispatcher retires a listener.
///
/// Each armed debounce timer carries a generation number. A fired timer may
/// race a re-arm (its callback runs as a task); the generation lets the fire
/// path clear only its own pending handle, never a fresher one.
#[derive(Default)]
pub(crate) struct RateGate {
    states: DashMap<ListenerId, RateState>,
}

impl RateGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Throttle check: true if the listener may fire now.
    ///
    /// Does not record the firing; call [`mark_fired`](Self::mark_fired) once
    /// the invocation attempt actually starts.
    pub(crate) fn throttle_open(&self, id: ListenerId, interval: Duration) -> bool {
        match self.states.get(&id).and_then(|s| s.last_fired) {
            Some(last) => last.elapsed() >= interval,
            None => true,
        }
    }

    /// Record that the listener's invocation attempt started now.
    pub(crate) fn mark_fired(&self, id: ListenerId) {
        self.states.entry(id).or_default().last_fired = Some(Instant::now());
    }

    /// Start a new debounce arming: bump and return the listener's
    /// generation. The caller schedules a timer tagged with this generation
    /// and then stores its handle via [`arm_debounce`](Self::arm_debounce).
    pub(crate) fn advance_generation(&self, id: ListenerId) -> u64 {
        let mut state = self.states.entry(id).or_default();
        state.generation += 1;
        state.generation
    }

    /// Store an armed timer's handle, cancelling the previously pending one.
    ///
    /// A stale `generation` means a newer arming already happened; the handle
    /// is cancelled instead of stored.
    pub(crate) fn arm_debounce(&self, id: ListenerId, generation: u64, handle: TimerHandle) {
        let mut state = self.states.entry(id).or_default();
        if state.generation != generation {
            handle.cancel();
            return;
        }
        if let Some(previous) = state.pending.replace(handle) {
            trace!(listener = %id, "debounce re-armed, previous timer cancelled");
            previous.cancel();
        }
    }

    /// Drop the pending timer handle without cancelling (the timer fired).
    ///
    /// Cleared only if `generation` is still current: a fired timer must not
    /// discard the handle of a timer armed after it.
    pub(crate) fn clear_pending(&self, id: ListenerId, generation: u64) {
        if let Some(mut state) = self.states.get_mut(&id) {
            if state.generation == generation {
                state.pending = None;
            }
        }
    }

    /// Retire a listener: cancel any pending timer and forget its state.
    pub(crate) fn release(&self, id: ListenerId) {
        if let Some((_, state)) = self.states.remove(&id) {
            if let Some(pending) = state.pending {
                pending.cancel();
            }
        }
    }

    /// Cancel every pending timer (shutdown path).
    pub(crate) fn cancel_all(&self) {
        for mut entry in self.states.iter_mut() {
            if let Some(pending) = entry.pending.take() {
                pending.cancel();
            }
        }
    }
}

impl fmt::Debug for RateGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateGate")
            .field("tracked", &self.states.len())
            .finish()
    }
}
