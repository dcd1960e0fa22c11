//! Tandem Client
//!
//! Client half of the Tandem bidirectional RPC session protocol: call
//! functions a remote peer exposes through a dynamically negotiated
//! contract, and export local functions the peer can call back, all
//! over one persistent duplex channel.
//!
//! # Architecture
//!
//! - [`Client`] owns the session: lifecycle state machine, contract
//!   negotiation, and event delivery
//! - [`Correlator`] pairs outgoing calls with replies by correlation
//!   id; [`Exports`] dispatches inbound invocations to local functions
//! - [`RemoteProxy`] is the invoke-by-name stand-in for the peer,
//!   rebuilt on every contract announcement
//! - [`EventBus`] delivers the lifecycle events (`ready`, `update`,
//!   `onConnect`, `onDisconnect`, `onError`, `onMessage`,
//!   `onConnectionLost`, `onConnectionRetry` in the wire protocol's
//!   vocabulary; [`EventKind`] here)
//! - The transport is external: implement [`Transport`] and
//!   [`Connector`], and pump inbound [`TransportEvent`]s into
//!   [`Client::handle`]
//!
//! # Example
//!
//! ```no_run
//! use tandem_client::{Client, ClientConfig, Connector, EventKind, Notification};
//!
//! # fn demo(connector: impl Connector + Send + Sync + 'static) -> tandem_common::Result<()> {
//! let client = Client::new(
//!     ClientConfig {
//!         uri: Some("ws://localhost:8000/".to_string()),
//!         ..ClientConfig::default()
//!     },
//!     connector,
//! )?;
//!
//! client.on(EventKind::Ready, |notification| {
//!     if let Notification::Ready { proxy, contract } = notification {
//!         println!("server exposes {:?}", contract);
//!         let _ = proxy.invoke("hello", vec![]);
//!     }
//! });
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod correlator;
pub mod events;
pub mod proxy;
pub mod transport;

pub use client::{AuthGate, Client, SessionState};
pub use config::{AuthenticateFn, ClientConfig, DEFAULT_PREFIX, DEFAULT_RETRY, URI_ENV_VAR};
pub use correlator::{CallContext, Correlator, ExportFn, Exports, PendingReply, ReplyHandle};
pub use events::{EventBus, EventKind, Notification};
pub use proxy::RemoteProxy;
pub use transport::{ConnectOptions, Connector, SharedTransport, Transport, TransportEvent};
