//! The listener registry: owns all subscriptions, grouped by owner.
//!
//! # Thread safety
//!
//! Structural mutation (`register`, `unregister`, `remove_all`) is guarded
//! by a `tokio::sync::Mutex`, which hands the lock out in FIFO order, so
//! concurrent teardown and setup calls cannot starve each other. The lock is
//! never held across a handler invocation: dispatch takes an immutable
//! [`snapshot`](ListenerRegistry::snapshot) of matching listeners and
//! releases the lock before invoking anything, so a handler that
//! unsubscribes itself (or anyone else) mid-dispatch cannot corrupt
//! iteration.
//!
//! # Lifecycle
//!
//! A listener survives until explicit [`Subscription::cancel`],
//! owner-scoped [`remove_all`](ListenerRegistry::remove_all), or automatic
//! once-removal by the dispatcher. Listener ids are unique for the lifetime
//! of the registry and never reused.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::extract::{ParamSpec, ParamTable};
use crate::handler::Handler;
use crate::pattern::EntityFilter;
use crate::predicate::Predicate;
use crate::rate::RateMode;

/// Unique listener identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Create a new random listener id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// The logical unit that registered a set of listeners.
///
/// Owners scope bulk lifecycle operations: an automation unit tearing down
/// removes all of its listeners atomically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// The owner name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered listener.
///
/// Immutable after registration; rate-control state lives in the
/// dispatcher's side table, keyed by [`Listener::id`].
#[derive(Debug)]
pub struct Listener {
    /// Unique id, never reused.
    pub id: ListenerId,
    /// The owner this listener belongs to.
    pub owner: OwnerId,
    /// The subscribed topic (exact match).
    pub topic: String,
    /// Identifier filter; empty matches everything on the topic.
    pub filter: EntityFilter,
    /// Predicate list, implicit AND.
    pub predicates: SmallVec<[Predicate; 4]>,
    /// Resolved parameter table.
    pub params: ParamTable,
    /// The invocation capability.
    pub handler: Handler,
    /// Remove after the first attempt past the rate gate.
    pub once: bool,
    /// Rate-control mode, if any.
    pub rate: Option<RateMode>,
}

/// A declared (not yet validated) subscription.
///
/// Built with [`ListenerBuilder`]; validated by
/// [`ListenerRegistry::register`].
#[derive(Debug)]
pub struct ListenerSpec {
    pub(crate) owner: OwnerId,
    pub(crate) topic: String,
    pub(crate) filter: EntityFilter,
    pub(crate) predicates: SmallVec<[Predicate; 4]>,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) constants: BTreeMap<String, Value>,
    pub(crate) handler: Handler,
    pub(crate) once: bool,
    pub(crate) debounce: Option<Duration>,
    pub(crate) throttle: Option<Duration>,
}

impl ListenerSpec {
    /// Start building a subscription for `owner` on `topic`.
    pub fn builder(owner: impl Into<OwnerId>, topic: impl Into<String>) -> ListenerBuilder {
        ListenerBuilder {
            owner: owner.into(),
            topic: topic.into(),
            filter: EntityFilter::any(),
            predicates: SmallVec::new(),
            params: Vec::new(),
            constants: BTreeMap::new(),
            once: false,
            debounce: None,
            throttle: None,
        }
    }
}

/// Builder for a [`ListenerSpec`].
///
/// # Example
///
/// ```ignore
/// let spec = ListenerSpec::builder("automation.morning", topics::STATE_CHANGED)
///     .entity("light.*")
///     .predicate(Predicate::changed_to("on"))
///     .param(ParamSpec::inject("new", Injectable::NewState))
///     .debounce(Duration::from_secs(2))
///     .handler(Handler::non_blocking(|args| async move { Ok(()) }));
/// let subscription = registry.register(spec).await?;
/// ```
#[derive(Debug)]
pub struct ListenerBuilder {
    owner: OwnerId,
    topic: String,
    filter: EntityFilter,
    predicates: SmallVec<[Predicate; 4]>,
    params: Vec<ParamSpec>,
    constants: BTreeMap<String, Value>,
    once: bool,
    debounce: Option<Duration>,
    throttle: Option<Duration>,
}

impl ListenerBuilder {
    /// Add an entity-identifier pattern (literal or glob).
    pub fn entity(mut self, pattern: &str) -> Self {
        self.filter = self.filter.entity(pattern);
        self
    }

    /// Add a domain pattern.
    pub fn domain(mut self, pattern: &str) -> Self {
        self.filter = self.filter.domain(pattern);
        self
    }

    /// Add a service-name pattern.
    pub fn service(mut self, pattern: &str) -> Self {
        self.filter = self.filter.service(pattern);
        self
    }

    /// Replace the whole identifier filter.
    pub fn filter(mut self, filter: EntityFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Add a predicate (AND'ed with the others).
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Declare a handler parameter.
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Supply a constant keyword argument, merged into every invocation.
    pub fn constant(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }

    /// Remove the listener after its first attempt past the rate gate.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Debounce: fire once per burst, after `interval` of silence.
    pub fn debounce(mut self, interval: Duration) -> Self {
        self.debounce = Some(interval);
        self
    }

    /// Throttle: drop events within `interval` of the last invocation.
    pub fn throttle(mut self, interval: Duration) -> Self {
        self.throttle = Some(interval);
        self
    }

    /// Attach the handler, finishing the spec.
    pub fn handler(self, handler: Handler) -> ListenerSpec {
        ListenerSpec {
            owner: self.owner,
            topic: self.topic,
            filter: self.filter,
            predicates: self.predicates,
            params: self.params,
            constants: self.constants,
            handler,
            once: self.once,
            debounce: self.debounce,
            throttle: self.throttle,
        }
    }
}

/// Registry owning all listeners, in registration order.
///
/// Cheap to clone; clones share the same underlying registry.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Vec<Arc<Listener>>>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a subscription.
    ///
    /// Validation is synchronous and all-or-nothing: on any
    /// [`ConfigurationError`] nothing is added to the registry.
    pub async fn register(
        &self,
        spec: ListenerSpec,
    ) -> Result<Subscription, ConfigurationError> {
        let rate = match (spec.debounce, spec.throttle) {
            (Some(_), Some(_)) => return Err(ConfigurationError::ConflictingRateOptions),
            (Some(d), None) if d.is_zero() => {
                return Err(ConfigurationError::ZeroInterval { kind: "debounce" })
            }
            (None, Some(t)) if t.is_zero() => {
                return Err(ConfigurationError::ZeroInterval { kind: "throttle" })
            }
            (Some(d), None) => Some(RateMode::Debounce(d)),
            (None, Some(t)) => Some(RateMode::Throttle(t)),
            (None, None) => None,
        };
        let params = ParamTable::resolve(spec.params, spec.constants)?;

        let listener = Arc::new(Listener {
            id: ListenerId::new(),
            owner: spec.owner,
            topic: spec.topic,
            filter: spec.filter,
            predicates: spec.predicates,
            params,
            handler: spec.handler,
            once: spec.once,
            rate,
        });

        let id = listener.id;
        debug!(
            listener = %id,
            owner = %listener.owner,
            topic = %listener.topic,
            once = listener.once,
            "listener registered"
        );

        let mut listeners = self.inner.lock().await;
        listeners.push(listener);
        drop(listeners);

        Ok(Subscription {
            id,
            registry: self.clone(),
        })
    }

    /// Remove a listener by id. Idempotent; returns whether anything was
    /// removed.
    pub async fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.lock().await;
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        let removed = listeners.len() < before;
        drop(listeners);
        if removed {
            debug!(listener = %id, "listener unregistered");
        }
        removed
    }

    /// Atomically remove every listener belonging to `owner`.
    ///
    /// Returns the number removed. In-flight invocations of removed
    /// listeners are allowed to complete; no future dispatch pass will see
    /// them.
    pub async fn remove_all(&self, owner: &OwnerId) -> usize {
        let mut listeners = self.inner.lock().await;
        let before = listeners.len();
        listeners.retain(|l| &l.owner != owner);
        let removed = before - listeners.len();
        drop(listeners);
        if removed > 0 {
            debug!(owner = %owner, removed, "owner listeners removed");
        }
        removed
    }

    /// Immutable snapshot of listeners subscribed to `topic`, in
    /// registration order.
    ///
    /// The lock is released before this returns; mutation during dispatch
    /// cannot corrupt the snapshot.
    pub async fn snapshot(&self, topic: &str) -> Vec<Arc<Listener>> {
        let listeners = self.inner.lock().await;
        listeners
            .iter()
            .filter(|l| l.topic == topic)
            .cloned()
            .collect()
    }

    /// Fetch a single listener by id.
    pub async fn get(&self, id: ListenerId) -> Option<Arc<Listener>> {
        let listeners = self.inner.lock().await;
        listeners.iter().find(|l| l.id == id).cloned()
    }

    /// Whether a listener with this id is registered.
    pub async fn contains(&self, id: ListenerId) -> bool {
        self.get(id).await.is_some()
    }

    /// Total number of registered listeners.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Number of listeners belonging to `owner`.
    pub async fn count_for_owner(&self, owner: &OwnerId) -> usize {
        let listeners = self.inner.lock().await;
        listeners.iter().filter(|l| &l.owner == owner).count()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry").finish_non_exhaustive()
    }
}

/// Opaque handle to one registered listener.
///
/// Cancellation is idempotent: cancelling twice, or cancelling a listener
/// already removed by once-removal or owner teardown, is a no-op.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: ListenerId,
    registry: ListenerRegistry,
}

impl Subscription {
    /// The listener id this handle refers to.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Cancel the subscription.
    pub async fn cancel(&self) {
        self.registry.unregister(self.id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Injectable;

    fn noop_handler() -> Handler {
        Handler::non_blocking(|_args| async { Ok(()) })
    }

    fn spec(owner: &str) -> ListenerSpec {
        ListenerSpec::builder(owner, "state_changed").handler(noop_handler())
    }

    #[tokio::test]
    async fn register_and_snapshot_in_order() {
        let registry = ListenerRegistry::new();
        let a = registry.register(spec("automation.a")).await.unwrap();
        let b = registry.register(spec("automation.b")).await.unwrap();
        let _other = registry
            .register(ListenerSpec::builder("automation.a", "service_called").handler(noop_handler()))
            .await
            .unwrap();

        let snapshot = registry.snapshot("state_changed").await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, a.id());
        assert_eq!(snapshot[1].id, b.id());
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ListenerRegistry::new();
        let sub = registry.register(spec("automation.a")).await.unwrap();

        assert!(registry.unregister(sub.id()).await);
        assert!(!registry.unregister(sub.id()).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn subscription_cancel_is_idempotent() {
        let registry = ListenerRegistry::new();
        let sub = registry.register(spec("automation.a")).await.unwrap();

        sub.cancel().await;
        sub.cancel().await;
        assert!(!registry.contains(sub.id()).await);
    }

    #[tokio::test]
    async fn remove_all_is_owner_scoped() {
        let registry = ListenerRegistry::new();
        registry.register(spec("automation.a")).await.unwrap();
        registry.register(spec("automation.a")).await.unwrap();
        let keep = registry.register(spec("automation.b")).await.unwrap();

        let removed = registry.remove_all(&OwnerId::from("automation.a")).await;
        assert_eq!(removed, 2);
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(keep.id()).await);
        assert_eq!(
            registry.count_for_owner(&OwnerId::from("automation.a")).await,
            0
        );
    }

    #[tokio::test]
    async fn conflicting_rate_options_fail_fast() {
        let registry = ListenerRegistry::new();
        let spec = ListenerSpec::builder("automation.a", "state_changed")
            .debounce(Duration::from_secs(1))
            .throttle(Duration::from_secs(1))
            .handler(noop_handler());

        let err = registry.register(spec).await.unwrap_err();
        assert_eq!(err, ConfigurationError::ConflictingRateOptions);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn zero_intervals_fail_fast() {
        let registry = ListenerRegistry::new();
        let spec = ListenerSpec::builder("automation.a", "state_changed")
            .debounce(Duration::ZERO)
            .handler(noop_handler());
        assert_eq!(
            registry.register(spec).await.unwrap_err(),
            ConfigurationError::ZeroInterval { kind: "debounce" }
        );

        let spec = ListenerSpec::builder("automation.a", "state_changed")
            .throttle(Duration::ZERO)
            .handler(noop_handler());
        assert_eq!(
            registry.register(spec).await.unwrap_err(),
            ConfigurationError::ZeroInterval { kind: "throttle" }
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn bad_signature_adds_nothing() {
        let registry = ListenerRegistry::new();
        let spec = ListenerSpec::builder("automation.a", "state_changed")
            .param(ParamSpec::inject("new", Injectable::NewState).positional_only())
            .handler(noop_handler());

        let err = registry.register(spec).await.unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::PositionalOnlyParameter { name: "new".into() }
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn listener_ids_are_unique() {
        let registry = ListenerRegistry::new();
        let a = registry.register(spec("automation.a")).await.unwrap();
        let b = registry.register(spec("automation.a")).await.unwrap();
        assert_ne!(a.id(), b.id());
    }
}
