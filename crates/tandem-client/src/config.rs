//! Client configuration.
//!
//! Address resolution is an explicit, testable function with a fixed
//! precedence order: an explicit URI beats host + prefix, which beats
//! the environment-provided default. Nothing here mutates globals.

use tandem_common::{Result, TandemError};

use crate::client::AuthGate;
use crate::transport::ConnectOptions;

/// Default channel path component.
pub const DEFAULT_PREFIX: &str = "tandem.io";

/// Default reconnection budget.
pub const DEFAULT_RETRY: u32 = 20;

/// Environment variable consulted when neither `uri` nor `host` is set.
pub const URI_ENV_VAR: &str = "TANDEM_URI";

/// Authentication hook.
///
/// Invoked after each contract announcement with a single-shot
/// [`AuthGate`]; the session does not reach `Ready` until the hook
/// opens the gate. The hook may complete asynchronously (e.g. after a
/// remote credential exchange) by moving the gate wherever it needs.
pub type AuthenticateFn = Box<dyn FnMut(AuthGate) + Send>;

/// Construction-time settings for a [`Client`](crate::Client).
///
/// # Example
///
/// ```
/// use tandem_client::ClientConfig;
///
/// let config = ClientConfig {
///     uri: Some("ws://localhost:8000/".to_string()),
///     retry: 3,
///     ..ClientConfig::default()
/// };
/// assert_eq!(config.resolve_uri().unwrap(), "ws://localhost:8000/");
/// ```
pub struct ClientConfig {
    /// Explicit server address; takes precedence over everything else.
    pub uri: Option<String>,
    /// Server host, combined with `prefix` when `uri` is absent.
    pub host: Option<String>,
    /// Channel path component (default [`DEFAULT_PREFIX`]).
    pub prefix: Option<String>,
    /// Reconnection budget (default [`DEFAULT_RETRY`]). The core never
    /// schedules reconnects itself; the budget is what
    /// [`disconnect`](crate::Client::disconnect) exhausts and what the
    /// connector receives as a hint.
    pub retry: u32,
    /// Connect during [`Client::new`](crate::Client::new) (default true).
    pub auto_connect: bool,
    /// Transport implementation hint, forwarded to the connector.
    pub transformer: Option<String>,
    /// Wire parser hint, forwarded to the connector.
    pub parser: Option<String>,
    /// Optional authentication hook; see [`AuthenticateFn`].
    pub authenticate: Option<AuthenticateFn>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: None,
            host: None,
            prefix: None,
            retry: DEFAULT_RETRY,
            auto_connect: true,
            transformer: None,
            parser: None,
            authenticate: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("uri", &self.uri)
            .field("host", &self.host)
            .field("prefix", &self.prefix)
            .field("retry", &self.retry)
            .field("auto_connect", &self.auto_connect)
            .field("transformer", &self.transformer)
            .field("parser", &self.parser)
            .field("authenticate", &self.authenticate.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Resolves the wire address for this session.
    ///
    /// Precedence: explicit `uri`, then `host` + `prefix` (default
    /// prefix if unset), then the [`URI_ENV_VAR`] environment
    /// variable. With none of the three available the configuration
    /// cannot produce an address.
    pub fn resolve_uri(&self) -> Result<String> {
        if let Some(uri) = &self.uri {
            return Ok(uri.clone());
        }

        if let Some(host) = &self.host {
            let prefix = self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX);
            return Ok(format!("{}/{}", host.trim_end_matches('/'), prefix));
        }

        match std::env::var(URI_ENV_VAR) {
            Ok(uri) if !uri.is_empty() => Ok(uri),
            _ => Err(TandemError::MissingAddress),
        }
    }

    /// Options handed to the connector when opening the transport.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            prefix: Some(
                self.prefix
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            ),
            transformer: self.transformer.clone(),
            parser: self.parser.clone(),
            retries: self.retry,
            min_delay_ms: 100,
        }
    }
}
