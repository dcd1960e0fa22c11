//! Invocation correlation.
//!
//! Outgoing calls are paired with their eventual replies through a
//! correlation id; the [`Correlator`] owns the pending-call table for
//! the lifetime of the session. Inbound invocation requests go the
//! other way, dispatched by [`Exports`] to locally exported functions.
//!
//! Correlation ids are strictly increasing per session, so an id is
//! never reused while its pending call is outstanding. Replies may
//! arrive in any order relative to the calls that produced them; the
//! id is the sole ordering key.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use tandem_common::{Envelope, Result, TandemError};

use crate::transport::SharedTransport;

/// A suspended outgoing call.
///
/// Resolves with the reply value once a matching invocation reply is
/// decoded, or with [`TandemError::SessionClosed`] if the session
/// closes first. Suspension is cooperative; no thread blocks.
pub struct PendingReply {
    rx: oneshot::Receiver<Value>,
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|reply| reply.map_err(|_| TandemError::SessionClosed))
    }
}

/// Locally exported function, callable by the remote peer.
///
/// The return value is sent back as the invocation reply unless the
/// function defers completion through [`CallContext::defer`].
pub type ExportFn = Box<dyn FnMut(&mut CallContext, &[Value]) -> Value + Send>;

/// Registry of locally exported functions.
///
/// Cheap to clone; all clones share one table. Names registered here
/// become callable by the peer as soon as the session is connected.
#[derive(Clone, Default)]
pub struct Exports {
    inner: Arc<Mutex<HashMap<String, ExportFn>>>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function under `name`, replacing any previous one.
    pub fn insert<F>(&self, name: impl Into<String>, function: F)
    where
        F: FnMut(&mut CallContext, &[Value]) -> Value + Send + 'static,
    {
        self.lock().insert(name.into(), Box::new(function));
    }

    /// Removes an export. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Dispatches an inbound invocation request to a local export.
    ///
    /// Unknown targets are dropped silently: cross-version contracts
    /// may diverge, so an unexported name is not an error to the
    /// caller. Unless the export deferred, its return value is sent
    /// back immediately as the reply.
    pub fn dispatch(&self, mut ctx: CallContext, function: &str, args: &[Value]) {
        let Some(mut handler) = self.take(function) else {
            debug!(target_fn = function, "dropping invocation of unknown export");
            return;
        };

        let value = handler(&mut ctx, args);
        self.restore(function, handler);

        if !ctx.is_deferred() {
            if let Err(err) = ctx.send_reply(value) {
                warn!(target_fn = function, error = %err, "failed to send invocation reply");
            }
        }
    }

    // Handlers are taken out of the table while they run so they can
    // register or remove exports themselves without deadlocking.
    fn take(&self, name: &str) -> Option<ExportFn> {
        self.lock().remove(name)
    }

    fn restore(&self, name: &str, function: ExportFn) {
        self.lock().entry(name.to_string()).or_insert(function);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ExportFn>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Context handed to a local export while it runs.
///
/// Carries the caller identity, the correlation id the reply must
/// echo, and the transport to send that reply on.
pub struct CallContext {
    caller: Option<String>,
    signature: u64,
    transport: SharedTransport,
    deferred: bool,
}

impl CallContext {
    pub(crate) fn new(caller: Option<String>, signature: u64, transport: SharedTransport) -> Self {
        Self {
            caller,
            signature,
            transport,
            deferred: false,
        }
    }

    /// Identity of the invoking connection, if the transport has one.
    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// Correlation id of this invocation.
    pub fn correlation(&self) -> u64 {
        self.signature
    }

    /// Opts into asynchronous completion.
    ///
    /// After this, the export's return value is discarded and the
    /// reply must be sent through the returned [`ReplyHandle`],
    /// possibly long after the export has returned.
    pub fn defer(&mut self) -> ReplyHandle {
        self.deferred = true;
        ReplyHandle {
            signature: self.signature,
            transport: self.transport.clone(),
        }
    }

    pub(crate) fn is_deferred(&self) -> bool {
        self.deferred
    }

    fn send_reply(&self, value: Value) -> Result<()> {
        self.transport
            .send(&Envelope::reply(self.signature, value).encode())
    }
}

/// Single-use capability for sending a deferred invocation reply.
pub struct ReplyHandle {
    signature: u64,
    transport: SharedTransport,
}

impl ReplyHandle {
    /// Sends the reply, consuming the handle.
    pub fn send(self, value: Value) -> Result<()> {
        self.transport
            .send(&Envelope::reply(self.signature, value).encode())
    }
}

/// Owns the pending-call table for outgoing invocations.
#[derive(Clone, Default)]
pub struct Correlator {
    inner: Arc<Mutex<CorrelatorInner>>,
}

#[derive(Default)]
struct CorrelatorInner {
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<Value>>,
    transport: Option<SharedTransport>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the transport outgoing calls are written to.
    pub(crate) fn bind(&self, transport: SharedTransport) {
        self.lock().transport = Some(transport);
    }

    /// Issues an outgoing call.
    ///
    /// Generates a fresh correlation id, records the pending entry,
    /// writes the invocation request, and returns the suspendable
    /// reply. A send failure removes the entry again and surfaces the
    /// transport error to the caller.
    pub fn call(&self, target: &str, args: Vec<Value>) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();

        let (id, transport) = {
            let mut inner = self.lock();
            let transport = inner.transport.clone().ok_or(TandemError::NotConnected)?;
            inner.next_id += 1;
            let id = inner.next_id;
            inner.pending.insert(id, tx);
            (id, transport)
        };

        debug!(target_fn = target, correlation = id, "issuing remote call");

        let frame = Envelope::invoke(target, id, args).encode();
        if let Err(err) = transport.send(&frame) {
            self.lock().pending.remove(&id);
            return Err(err);
        }

        Ok(PendingReply { rx })
    }

    /// Delivers a reply to the caller that issued correlation id `id`.
    ///
    /// A reply with no matching pending call is dropped without error;
    /// late replies after local give-up are expected traffic.
    pub fn resolve(&self, id: u64, value: Value) {
        match self.lock().pending.remove(&id) {
            Some(sender) => {
                // Send failure means the caller dropped its PendingReply.
                let _ = sender.send(value);
            }
            None => debug!(correlation = id, "dropping reply with no pending call"),
        }
    }

    /// Drops every pending call.
    ///
    /// Suspended callers observe [`TandemError::SessionClosed`]; their
    /// calls are never resolved with a value afterwards.
    pub fn abandon_all(&self) {
        let mut inner = self.lock();
        if !inner.pending.is_empty() {
            debug!(count = inner.pending.len(), "abandoning pending calls");
        }
        inner.pending.clear();
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, CorrelatorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use serde_json::json;

    struct FrameSink {
        frames: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for FrameSink {
        fn send(&mut self, data: &str) -> Result<()> {
            self.frames.lock().unwrap().push(data.to_string());
            Ok(())
        }

        fn close(&mut self) {}
    }

    struct BrokenPipe;

    impl Transport for BrokenPipe {
        fn send(&mut self, _data: &str) -> Result<()> {
            Err(TandemError::Transport("broken pipe".into()))
        }

        fn close(&mut self) {}
    }

    fn bound_correlator() -> (Correlator, Arc<Mutex<Vec<String>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let correlator = Correlator::new();
        correlator.bind(SharedTransport::new(Box::new(FrameSink {
            frames: frames.clone(),
        })));
        (correlator, frames)
    }

    #[test]
    fn test_call_without_transport_fails() {
        let correlator = Correlator::new();
        let result = correlator.call("hello", vec![]);
        assert!(matches!(result, Err(TandemError::NotConnected)));
    }

    #[test]
    fn test_correlation_ids_are_distinct_while_pending() {
        let (correlator, frames) = bound_correlator();

        let _a = correlator.call("a", vec![]).unwrap();
        let _b = correlator.call("b", vec![]).unwrap();
        let _c = correlator.call("c", vec![]).unwrap();

        let frames = frames.lock().unwrap();
        let ids: Vec<u64> = frames
            .iter()
            .map(|f| {
                serde_json::from_str::<Value>(f).unwrap()["signatureId"]
                    .as_u64()
                    .unwrap()
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(correlator.pending_count(), 3);
    }

    #[test]
    fn test_call_writes_invocation_request() {
        let (correlator, frames) = bound_correlator();

        let _pending = correlator.call("hello", vec![json!("x")]).unwrap();

        let frames = frames.lock().unwrap();
        let sent: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(
            sent,
            json!({"functionId": "hello", "signatureId": 1, "args": ["x"]})
        );
    }

    #[tokio::test]
    async fn test_replies_correlate_out_of_order() {
        let (correlator, _frames) = bound_correlator();

        let first = correlator.call("first", vec![]).unwrap();
        let second = correlator.call("second", vec![]).unwrap();
        let third = correlator.call("third", vec![]).unwrap();

        // Deliver replies in reverse order; each caller still receives
        // its own result.
        correlator.resolve(3, json!("three"));
        correlator.resolve(2, json!("two"));
        correlator.resolve(1, json!("one"));

        assert_eq!(first.await.unwrap(), json!("one"));
        assert_eq!(second.await.unwrap(), json!("two"));
        assert_eq!(third.await.unwrap(), json!("three"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_unknown_correlation_is_dropped() {
        let (correlator, _frames) = bound_correlator();
        correlator.resolve(999, json!("late"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_calls_observe_session_closed() {
        let (correlator, _frames) = bound_correlator();

        let pending = correlator.call("hello", vec![]).unwrap();
        correlator.abandon_all();

        assert!(matches!(pending.await, Err(TandemError::SessionClosed)));

        // A late reply for the abandoned call is a no-op.
        correlator.resolve(1, json!("too late"));
    }

    #[test]
    fn test_send_failure_removes_pending_entry() {
        let correlator = Correlator::new();
        correlator.bind(SharedTransport::new(Box::new(BrokenPipe)));

        let result = correlator.call("hello", vec![]);
        assert!(matches!(result, Err(TandemError::Transport(_))));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_dispatch_replies_with_return_value() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let transport = SharedTransport::new(Box::new(FrameSink {
            frames: frames.clone(),
        }));
        let exports = Exports::new();
        exports.insert("add", |_ctx: &mut CallContext, args: &[Value]| {
            let sum = args.iter().filter_map(Value::as_i64).sum::<i64>();
            json!(sum)
        });

        let ctx = CallContext::new(None, 7, transport);
        exports.dispatch(ctx, "add", &[json!(2), json!(3)]);

        let frames = frames.lock().unwrap();
        let sent: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(sent, json!({"signatureId": 7, "resultId": 5}));
    }

    #[test]
    fn test_dispatch_unknown_target_sends_nothing() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let transport = SharedTransport::new(Box::new(FrameSink {
            frames: frames.clone(),
        }));
        let exports = Exports::new();

        let ctx = CallContext::new(None, 7, transport);
        exports.dispatch(ctx, "nonexistent", &[]);

        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_deferred_reply() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let transport = SharedTransport::new(Box::new(FrameSink {
            frames: frames.clone(),
        }));
        let exports = Exports::new();

        let parked: Arc<Mutex<Option<ReplyHandle>>> = Arc::new(Mutex::new(None));
        let parked_in = parked.clone();
        exports.insert("slow", move |ctx: &mut CallContext, _args: &[Value]| {
            *parked_in.lock().unwrap() = Some(ctx.defer());
            Value::Null
        });

        let ctx = CallContext::new(None, 9, transport);
        exports.dispatch(ctx, "slow", &[]);

        // Deferred: no reply yet, and the handler stays registered.
        assert!(frames.lock().unwrap().is_empty());
        assert!(exports.contains("slow"));

        let handle = parked.lock().unwrap().take().unwrap();
        handle.send(json!("done")).unwrap();

        let frames = frames.lock().unwrap();
        let sent: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(sent, json!({"signatureId": 9, "resultId": "done"}));
    }

    #[test]
    fn test_export_can_read_context() {
        let transport = SharedTransport::new(Box::new(FrameSink {
            frames: Arc::new(Mutex::new(Vec::new())),
        }));
        let exports = Exports::new();

        let seen = Arc::new(Mutex::new(None));
        let seen_in = seen.clone();
        exports.insert("who", move |ctx: &mut CallContext, _args: &[Value]| {
            *seen_in.lock().unwrap() = Some(ctx.correlation());
            Value::Null
        });

        let ctx = CallContext::new(None, 42, transport);
        exports.dispatch(ctx, "who", &[]);
        assert_eq!(*seen.lock().unwrap(), Some(42));
    }
}
