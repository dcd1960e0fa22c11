//! Session event bus.
//!
//! A minimal named-event registry: every lifecycle notification the
//! session produces goes through here. Subscribers run synchronously,
//! in registration order, on the thread that emitted the event; the bus
//! catches nothing, so a panicking subscriber propagates to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tandem_common::Contract;

use crate::proxy::RemoteProxy;

/// The session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// First contract processed; the session is usable.
    Ready,
    /// A subsequent contract announcement was processed.
    Update,
    /// Transport opened.
    Connect,
    /// Transport closed.
    Disconnect,
    /// Lower-layer transport failure.
    Error,
    /// Raw inbound frame (fires before decoding).
    Message,
    /// The connection is gone for good.
    ConnectionLost,
    /// Connectivity dropped; a retry may follow.
    ConnectionRetry,
}

/// Payload delivered to subscribers.
///
/// `Ready` and `Update` carry the freshly built proxy and the contract
/// it was built from, so handlers never observe a proxy that is stale
/// relative to the event they received.
pub enum Notification {
    Ready { proxy: RemoteProxy, contract: Contract },
    Update { proxy: RemoteProxy, contract: Contract },
    Connect,
    Disconnect { reason: Option<String> },
    Error { message: String },
    Message { raw: String },
    ConnectionLost,
    ConnectionRetry { reason: Option<String> },
}

impl Notification {
    /// The event this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            Notification::Ready { .. } => EventKind::Ready,
            Notification::Update { .. } => EventKind::Update,
            Notification::Connect => EventKind::Connect,
            Notification::Disconnect { .. } => EventKind::Disconnect,
            Notification::Error { .. } => EventKind::Error,
            Notification::Message { .. } => EventKind::Message,
            Notification::ConnectionLost => EventKind::ConnectionLost,
            Notification::ConnectionRetry { .. } => EventKind::ConnectionRetry,
        }
    }
}

type Subscriber = Box<dyn FnMut(&Notification) + Send>;

/// Ordered subscriber registry keyed by [`EventKind`].
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<HashMap<EventKind, Vec<Subscriber>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subscriber for one event.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.lock().entry(kind).or_default().push(Box::new(callback));
    }

    /// Invokes every subscriber of the notification's event, in
    /// registration order.
    ///
    /// Subscribers are taken out of the registry while they run, so a
    /// handler may subscribe (to this or any other event) without
    /// deadlocking; handlers added to the emitting event during the
    /// emit run from the next emit onward.
    pub fn emit(&self, notification: &Notification) {
        let kind = notification.kind();
        let mut current = match self.lock().get_mut(&kind) {
            Some(slot) => std::mem::take(slot),
            None => return,
        };

        for subscriber in current.iter_mut() {
            subscriber(notification);
        }

        let mut registry = self.lock();
        let slot = registry.entry(kind).or_default();
        let added_during_emit = std::mem::replace(slot, current);
        slot.extend(added_during_emit);
    }

    /// Number of subscribers for one event.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map(Vec::len).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Vec<Subscriber>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribers_run_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = log.clone();
            bus.on(EventKind::Connect, move |_| {
                log.lock().unwrap().push(tag);
            });
        }

        bus.emit(&Notification::Connect);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_emit_only_reaches_matching_kind() {
        let bus = EventBus::new();
        let connects = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let c = connects.clone();
        bus.on(EventKind::Connect, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let e = errors.clone();
        bus.on(EventKind::Error, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Notification::Connect);
        bus.emit(&Notification::Connect);

        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.emit(&Notification::ConnectionLost);
    }

    #[test]
    fn test_subscribing_during_emit_does_not_deadlock() {
        let bus = EventBus::new();
        let late = Arc::new(AtomicUsize::new(0));

        let bus_inside = bus.clone();
        let late_inside = late.clone();
        bus.on(EventKind::Connect, move |_| {
            let late = late_inside.clone();
            bus_inside.on(EventKind::Connect, move |_| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        });

        // The handler added mid-emit does not run for this emit...
        bus.emit(&Notification::Connect);
        assert_eq!(late.load(Ordering::SeqCst), 0);

        // ...but it is registered for the next one.
        bus.emit(&Notification::Connect);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriber_count() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(EventKind::Ready), 0);
        bus.on(EventKind::Ready, |_| {});
        bus.on(EventKind::Ready, |_| {});
        assert_eq!(bus.subscriber_count(EventKind::Ready), 2);
    }
}
