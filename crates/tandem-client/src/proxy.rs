//! Remote proxy.
//!
//! The proxy is the local stand-in for the remote peer: one callable
//! entry per contract name, uniformly invoked by name. It is a pure
//! function of (contract, correlator) and is rebuilt from scratch on
//! every contract announcement; `ready`/`update` events carry the
//! regenerated instance so handlers never hold a proxy that is stale
//! relative to the event.

use serde_json::Value;

use tandem_common::{Contract, Result, TandemError};

use crate::correlator::{Correlator, PendingReply};

/// Locally synthesized object through which contract functions are
/// invoked.
///
/// Cheap to clone; clones share the session's correlator.
#[derive(Clone)]
pub struct RemoteProxy {
    names: Vec<String>,
    correlator: Correlator,
}

impl RemoteProxy {
    /// Builds a proxy exposing exactly the names of `contract`.
    pub(crate) fn new(contract: &Contract, correlator: Correlator) -> Self {
        let mut names = Vec::with_capacity(contract.len());
        for name in contract {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        Self { names, correlator }
    }

    /// The callable names, in contract order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether `name` is callable through this proxy.
    pub fn has(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Invokes a contract function by name.
    ///
    /// Serializes the arguments into an invocation request, writes it
    /// to the transport, and returns the suspended reply. Names absent
    /// from the most recent contract are rejected with
    /// [`TandemError::UnknownMethod`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use tandem_client::RemoteProxy;
    /// # use serde_json::json;
    /// # async fn demo(proxy: RemoteProxy) -> tandem_common::Result<()> {
    /// let greeting = proxy.invoke("hello", vec![json!("world")])?.await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<PendingReply> {
        if !self.has(name) {
            return Err(TandemError::UnknownMethod(name.to_string()));
        }
        self.correlator.call(name, args)
    }
}

impl std::fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}
