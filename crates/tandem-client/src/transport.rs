//! Transport seam.
//!
//! The session never opens sockets or frames bytes itself; it consumes
//! a duplex message transport through the [`Transport`] and
//! [`Connector`] traits and is driven by [`TransportEvent`]s the
//! embedding system feeds into [`Client::handle`](crate::Client::handle).
//! This mirrors the callback interface of the underlying channel
//! (`onopen` / `onmessage` / `onclose` / `onerror` / `ondisconnect`).

use std::sync::{Arc, Mutex, PoisonError};

use tandem_common::Result;

/// Outbound half of a duplex message transport.
pub trait Transport: Send {
    /// Writes one textual frame to the peer.
    fn send(&mut self, data: &str) -> Result<()>;

    /// Closes the connection. The embedder is expected to deliver a
    /// [`TransportEvent::Close`] once the close completes.
    fn close(&mut self);

    /// Connection identity, if the transport has one (used as caller
    /// identity in invocation contexts).
    fn id(&self) -> Option<String> {
        None
    }
}

/// Opens transports from a resolved wire address.
///
/// Implementations wrap whatever duplex channel the embedding system
/// uses (WebSocket, pipe, in-memory pair in tests). Selection hints
/// from the configuration are passed through untouched.
pub trait Connector {
    fn open(&self, uri: &str, options: &ConnectOptions) -> Result<Box<dyn Transport + Send>>;
}

/// Options forwarded to [`Connector::open`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Channel path component, invisible to the application.
    pub prefix: Option<String>,
    /// Transport implementation hint (connector-specific).
    pub transformer: Option<String>,
    /// Wire parser hint (connector-specific).
    pub parser: Option<String>,
    /// Retry budget the connector may use for its own low-level retries.
    pub retries: u32,
    /// Minimum delay between low-level retries, in milliseconds.
    pub min_delay_ms: u64,
}

/// Inbound notifications from the transport.
///
/// The embedding system translates the channel's callbacks into these
/// events and feeds them to the session, one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is established.
    Open,
    /// One textual frame arrived.
    Message(String),
    /// The connection closed, with an optional reason.
    Close(Option<String>),
    /// A lower-layer failure that does not terminate the session.
    Error(String),
    /// Connectivity lost; the transport may be retrying.
    Disconnect(Option<String>),
}

/// Shared handle to the session's transport.
///
/// The session owns the transport exclusively, but reply closures and
/// pending calls need to write to it outside the session's lock, so it
/// is wrapped once here and cloned where needed.
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<Box<dyn Transport + Send>>>,
}

impl SharedTransport {
    pub fn new(transport: Box<dyn Transport + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    /// Writes one frame to the peer.
    pub fn send(&self, data: &str) -> Result<()> {
        self.lock().send(data)
    }

    /// Closes the underlying connection.
    pub fn close(&self) {
        self.lock().close();
    }

    /// Connection identity reported by the transport.
    pub fn id(&self) -> Option<String> {
        self.lock().id()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn Transport + Send>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport").finish_non_exhaustive()
    }
}
