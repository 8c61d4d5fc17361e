//! Handlers: the invocation capability, in blocking and non-blocking shapes.
//!
//! A [`Handler`] is one of two variants:
//! - [`NonBlocking`](Handler::NonBlocking): an async function awaited in
//!   place on the dispatch pass.
//! - [`Blocking`](Handler::Blocking): a synchronous function the dispatcher
//!   offloads to the blocking worker pool so it never stalls delivery to
//!   other listeners.
//!
//! The dispatcher branches on the variant explicitly; there is no runtime
//! detection of handler shape. Handlers return `anyhow::Result<()>`; errors
//! are classified and contained by the dispatcher, never propagated across
//! listener boundaries.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::event::Event;

/// One resolved argument delivered to a handler.
#[derive(Debug, Clone)]
pub enum ArgValue {
    /// The parameter declared it needs no data.
    None,
    /// The raw event object.
    Event(Arc<Event>),
    /// An extracted (or constant) payload value.
    Value(Value),
}

/// The resolved argument set for one invocation.
///
/// Arguments appear in declaration order, followed by subscription-time
/// constants. Lookup is by name; the set is small, so lookup is a linear
/// scan.
#[derive(Debug, Clone)]
pub struct HandlerArgs {
    event: Arc<Event>,
    args: Vec<(String, ArgValue)>,
}

impl HandlerArgs {
    pub(crate) fn new(event: Arc<Event>, args: Vec<(String, ArgValue)>) -> Self {
        Self { event, args }
    }

    /// The event that triggered this invocation.
    ///
    /// Always available regardless of declared parameters.
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    /// Look up an argument by name.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Look up an extracted or constant value by name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.get(name)? {
            ArgValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Look up a raw-event argument by name.
    pub fn event_arg(&self, name: &str) -> Option<&Arc<Event>> {
        match self.get(name)? {
            ArgValue::Event(e) => Some(e),
            _ => None,
        }
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the argument set is empty.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Iterate arguments in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.args.iter().map(|(n, v)| (n.as_str(), v))
    }
}

type NonBlockingFn =
    Arc<dyn Fn(HandlerArgs) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type BlockingFn = Arc<dyn Fn(HandlerArgs) -> anyhow::Result<()> + Send + Sync>;

/// The invocation capability for one listener.
#[derive(Clone)]
pub enum Handler {
    /// Awaited in place on the dispatch pass.
    NonBlocking(NonBlockingFn),
    /// Offloaded to the blocking worker pool.
    Blocking(BlockingFn),
}

impl Handler {
    /// Wrap an async function.
    pub fn non_blocking<F, Fut>(f: F) -> Self
    where
        F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Handler::NonBlocking(Arc::new(move |args| Box::pin(f(args))))
    }

    /// Wrap a synchronous function.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(HandlerArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Handler::Blocking(Arc::new(f))
    }

    /// Whether this handler runs on the blocking pool.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Handler::Blocking(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::NonBlocking(_) => f.write_str("Handler::NonBlocking"),
            Handler::Blocking(_) => f.write_str("Handler::Blocking"),
        }
    }
}
