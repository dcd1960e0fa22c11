//! Connection session.
//!
//! [`Client`] orchestrates one logical connection lifetime: it opens
//! the transport through the configured [`Connector`], drives contract
//! negotiation, wires the codec, correlator and proxy builder
//! together, and surfaces every lifecycle change through the event
//! bus. All protocol handling runs inside [`Client::handle`], one
//! transport event at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use tandem_common::{Contract, Decoded, Envelope, Result};

use crate::config::{AuthenticateFn, ClientConfig};
use crate::correlator::{CallContext, Correlator, Exports};
use crate::events::{EventBus, EventKind, Notification};
use crate::proxy::RemoteProxy;
use crate::transport::{Connector, SharedTransport, TransportEvent};

/// Lifecycle of one session.
///
/// `Ready` implies the contract has been received and authentication,
/// if configured, has completed. A `Closed` session never resumes in
/// place; a fresh `connect` supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Negotiating,
    Ready,
    Closed,
}

struct Inner {
    state: SessionState,
    contract: Option<Contract>,
    proxy: Option<RemoteProxy>,
    transport: Option<SharedTransport>,
    tries: u32,
}

/// Client half of a bidirectional RPC session.
///
/// Cheap to clone; all clones share one session. The embedding system
/// supplies the transport (via a [`Connector`]) and pumps its inbound
/// callbacks into [`handle`](Self::handle); contract negotiation,
/// invocation correlation, proxy construction and event delivery all
/// happen here.
///
/// # Example
///
/// ```no_run
/// # use tandem_client::*;
/// # use serde_json::{json, Value};
/// # fn demo(connector: impl Connector + Send + Sync + 'static) -> tandem_common::Result<()> {
/// let config = ClientConfig {
///     uri: Some("ws://localhost:8000/".to_string()),
///     ..ClientConfig::default()
/// };
/// let client = Client::new(config, connector)?;
///
/// // Functions the server may call back into:
/// client.export("notify", |_ctx: &mut CallContext, args: &[Value]| {
///     println!("server says: {:?}", args);
///     Value::Null
/// });
///
/// client.on(EventKind::Ready, |notification| {
///     if let Notification::Ready { proxy, .. } = notification {
///         let _pending = proxy.invoke("hello", vec![json!("world")]);
///     }
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Mutex<Inner>>,
    events: EventBus,
    correlator: Correlator,
    exports: Exports,
    connector: Arc<dyn Connector + Send + Sync>,
    authenticate: Arc<Mutex<Option<AuthenticateFn>>>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Creates a session from configuration and a connector.
    ///
    /// With `auto_connect` set (the default) the transport is opened
    /// immediately; otherwise [`connect`](Self::connect) must be
    /// called explicitly.
    pub fn new(
        mut config: ClientConfig,
        connector: impl Connector + Send + Sync + 'static,
    ) -> Result<Self> {
        let authenticate = config.authenticate.take();
        let client = Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Disconnected,
                contract: None,
                proxy: None,
                transport: None,
                tries: 0,
            })),
            events: EventBus::new(),
            correlator: Correlator::new(),
            exports: Exports::new(),
            connector: Arc::new(connector),
            authenticate: Arc::new(Mutex::new(authenticate)),
            config: Arc::new(config),
        };

        if client.config.auto_connect {
            client.connect()?;
        }

        Ok(client)
    }

    /// Opens the transport and starts a session.
    ///
    /// Resolves the wire address from the configuration, opens the
    /// transport through the connector and binds it to the correlator.
    /// Calling this while already connecting or connected is a
    /// documented caller error and is not guarded here.
    pub fn connect(&self) -> Result<()> {
        let uri = self.config.resolve_uri()?;
        let options = self.config.connect_options();

        debug!(%uri, "opening transport");
        let transport = SharedTransport::new(self.connector.open(&uri, &options)?);
        self.correlator.bind(transport.clone());

        let mut inner = self.lock();
        inner.transport = Some(transport);
        inner.state = SessionState::Connecting;
        Ok(())
    }

    /// Closes the session.
    ///
    /// Exhausts the retry budget so no reconnection attempt can be
    /// scheduled, closes the transport, and abandons every pending
    /// call.
    pub fn disconnect(&self) {
        let transport = {
            let mut inner = self.lock();
            inner.tries = self.config.retry + 1;
            inner.state = SessionState::Closed;
            inner.transport.take()
        };
        self.correlator.abandon_all();
        if let Some(transport) = transport {
            transport.close();
        }
    }

    /// True iff the session is `Ready`.
    pub fn is_ready(&self) -> bool {
        self.lock().state == SessionState::Ready
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// The current server proxy, once a contract has been received.
    pub fn proxy(&self) -> Option<RemoteProxy> {
        self.lock().proxy.clone()
    }

    /// The most recently received contract.
    pub fn contract(&self) -> Option<Contract> {
        self.lock().contract.clone()
    }

    /// Registers a locally exported function the peer may invoke.
    pub fn export<F>(&self, name: impl Into<String>, function: F)
    where
        F: FnMut(&mut CallContext, &[serde_json::Value]) -> serde_json::Value + Send + 'static,
    {
        self.exports.insert(name, function);
    }

    /// Removes a local export. Returns whether it existed.
    pub fn unexport(&self, name: &str) -> bool {
        self.exports.remove(name)
    }

    /// Handle to the export registry.
    pub fn exports(&self) -> Exports {
        self.exports.clone()
    }

    /// Subscribes to a lifecycle event.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.events.on(kind, callback);
    }

    /// Subscribes to the `Ready` event with a typed callback.
    pub fn on_ready<F>(&self, mut callback: F)
    where
        F: FnMut(&RemoteProxy, &Contract) + Send + 'static,
    {
        self.events.on(EventKind::Ready, move |notification| {
            if let Notification::Ready { proxy, contract } = notification {
                callback(proxy, contract);
            }
        });
    }

    /// Subscribes to the `Update` event with a typed callback.
    pub fn on_update<F>(&self, mut callback: F)
    where
        F: FnMut(&RemoteProxy, &Contract) + Send + 'static,
    {
        self.events.on(EventKind::Update, move |notification| {
            if let Notification::Update { proxy, contract } = notification {
                callback(proxy, contract);
            }
        });
    }

    /// Feeds one inbound transport event into the session.
    ///
    /// This is the session's single protocol entry point; the embedder
    /// calls it from the transport's callbacks, one event at a time.
    pub fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                {
                    let mut inner = self.lock();
                    inner.state = SessionState::Negotiating;
                    inner.tries = 0;
                }
                self.events.emit(&Notification::Connect);
            }
            TransportEvent::Message(raw) => self.handle_message(raw),
            TransportEvent::Disconnect(reason) => {
                // Reconnection scheduling is the embedder's policy; the
                // session only reports that connectivity dropped.
                self.events.emit(&Notification::ConnectionRetry { reason });
            }
            TransportEvent::Close(reason) => {
                {
                    let mut inner = self.lock();
                    inner.state = SessionState::Closed;
                    inner.transport = None;
                }
                self.correlator.abandon_all();
                self.events.emit(&Notification::Disconnect { reason });
                self.events.emit(&Notification::ConnectionLost);
            }
            TransportEvent::Error(message) => {
                self.events.emit(&Notification::Error { message });
            }
        }
    }

    fn handle_message(&self, raw: String) {
        self.events.emit(&Notification::Message { raw: raw.clone() });

        match Envelope::decode(&raw) {
            Decoded::Frame(Envelope::Contract(contract)) => self.handle_contract(contract),
            Decoded::Frame(Envelope::Invoke {
                function,
                signature,
                args,
            }) => {
                let transport = self.lock().transport.clone();
                let Some(transport) = transport else {
                    debug!(target_fn = %function, "dropping invocation: no transport");
                    return;
                };
                let ctx = CallContext::new(transport.id(), signature, transport);
                self.exports.dispatch(ctx, &function, &args);
            }
            Decoded::Frame(Envelope::Reply { signature, result }) => {
                self.correlator.resolve(signature, result);
            }
            Decoded::Empty => {
                debug!("ignoring unclassifiable frame");
            }
        }
    }

    fn handle_contract(&self, contract: Contract) {
        let (proxy, update) = {
            let mut inner = self.lock();
            // An empty earlier contract does not count as a prior one:
            // the first non-empty announcement is still the ready path.
            let update = inner.contract.as_ref().is_some_and(|c| !c.is_empty());
            let proxy = RemoteProxy::new(&contract, self.correlator.clone());
            inner.contract = Some(contract.clone());
            inner.proxy = Some(proxy.clone());
            (proxy, update)
        };

        debug!(functions = contract.len(), update, "received contract");

        let gate = AuthGate {
            session: self.inner.clone(),
            events: self.events.clone(),
            proxy,
            contract,
            update,
        };

        // The hook is taken out while it runs so it can move the gate
        // into an asynchronous credential exchange if it wants to.
        let hook = self.authenticate_slot().take();
        match hook {
            Some(mut hook) => {
                hook(gate);
                let mut slot = self.authenticate_slot();
                if slot.is_none() {
                    *slot = Some(hook);
                }
            }
            None => gate.open(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authenticate_slot(&self) -> MutexGuard<'_, Option<AuthenticateFn>> {
        self.authenticate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-shot continuation completing contract negotiation.
///
/// Handed to the authentication hook after each contract announcement.
/// Opening the gate flips the session to `Ready` and fires `ready`
/// (first contract) or `update` (renegotiation). Dropping the gate
/// without opening it leaves the session negotiating; that is the
/// denial path for a hook that rejects the peer.
pub struct AuthGate {
    session: Arc<Mutex<Inner>>,
    events: EventBus,
    proxy: RemoteProxy,
    contract: Contract,
    update: bool,
}

impl AuthGate {
    /// Completes negotiation, consuming the gate.
    pub fn open(self) {
        {
            let mut inner = self
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // The session may have died while authentication was in
            // flight; a closed session never becomes ready.
            if inner.state == SessionState::Closed {
                warn!("authentication completed after session close; ignoring");
                return;
            }
            inner.state = SessionState::Ready;
        }

        let notification = if self.update {
            Notification::Update {
                proxy: self.proxy,
                contract: self.contract,
            }
        } else {
            Notification::Ready {
                proxy: self.proxy,
                contract: self.contract,
            }
        };
        self.events.emit(&notification);
    }
}
