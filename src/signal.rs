//! Process-wide publish/subscribe bus.
//!
//! The signal bus is the only integration surface between the framing layer
//! (dispatcher) and application/handler code. `emit` is ordered: handlers
//! run in registration order, awaited one at a time, so reply-collecting
//! paths (the control protocol's request/reply calls) get deterministic
//! ordering for free. Concurrency is the caller's problem — the bus itself
//! holds nothing beyond the handler table, and that table is only mutated
//! during setup (registration happens at node construction and
//! control-handler registration time, never while nodes are running).
//!
//! Handlers are boxed async closures rather than plain functions: control
//! handlers need to call back into the network controller, whose data
//! operations hold the wrapper's lock for the duration of the traversal, so
//! the bus has to let them `.await` rather than forcing them to block the
//! executor.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, warn};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handler receives the signal's argument value and returns an optional
/// reply value. `None` (or a handler that panics) is treated as an empty
/// map reply — fan-out to the remaining handlers is never interrupted.
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Signal {
    /// `(node_name, message_type)` — a dispatched message or control request.
    Message(String, String),
    /// `"{node}_connected"` — emitted exactly once per transition to connected.
    Connected(String),
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Message(node, ty) => write!(f, "({node}, {ty})"),
            Signal::Connected(node) => write!(f, "{node}_connected"),
        }
    }
}

impl Signal {
    pub fn connected(node: impl Into<String>) -> Self {
        Signal::Connected(node.into())
    }

    pub fn message(node: impl Into<String>, ty: impl Into<String>) -> Self {
        Signal::Message(node.into(), ty.into())
    }
}

#[derive(Default)]
pub struct SignalBus {
    handlers: Mutex<HashMap<Signal, Vec<Handler>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the handler list for `signal`. Idempotent only by
    /// explicit deduplication at the call site — calling `connect` twice
    /// with the same signal registers two invocations.
    pub fn connect(&self, signal: Signal, handler: Handler) {
        self.handlers.lock().entry(signal).or_default().push(handler);
    }

    /// Invoke every handler registered for `signal`, in registration order,
    /// one at a time. A handler that returns `None` (or a falsy JSON value)
    /// contributes an empty JSON object to the reply list rather than being
    /// skipped, so callers can always index replies by handler position. A
    /// handler that panics is caught (via `tokio::spawn` + `JoinError`) and
    /// treated the same way; it never aborts fan-out to the remaining
    /// handlers. Returns an empty list if the signal has no handlers.
    pub async fn emit(&self, signal: &Signal, args: Value) -> Vec<Value> {
        let handlers = {
            let guard = self.handlers.lock();
            guard.get(signal).cloned().unwrap_or_default()
        };
        if handlers.is_empty() {
            warn!(signal = %signal, "emit with no registered handlers");
            return Vec::new();
        }
        let mut replies = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let fut = handler(args.clone());
            match tokio::spawn(fut).await {
                Ok(Some(reply)) if !reply.is_null() && reply != Value::Bool(false) => {
                    replies.push(reply);
                }
                Ok(_) => replies.push(Value::Object(Default::default())),
                Err(join_err) => {
                    error!(signal = %signal, error = %join_err, "handler panicked; treating as empty reply");
                    replies.push(Value::Object(Default::default()));
                }
            }
        }
        replies
    }
}

/// Convenience constructor for a handler built from a plain synchronous
/// closure, for the common case (most dispatch handlers don't need to
/// `.await` anything).
pub fn sync_handler<F>(f: F) -> Handler
where
    F: Fn(Value) -> Option<Value> + Send + Sync + 'static,
{
    Arc::new(move |args| {
        let reply = f(args);
        Box::pin(async move { reply })
    })
}
