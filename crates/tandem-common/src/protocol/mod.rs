pub mod envelope;
pub mod error;

pub use envelope::{Decoded, Envelope};
pub use error::{Result, TandemError};

/// The list of function names the remote peer currently exposes.
///
/// Received once per session as the first message after open, and again
/// on every renegotiation.
pub type Contract = Vec<String>;

/// Protocol key constants.
///
/// These names are shared with the server side of the protocol; both
/// ends must keep them stable to interoperate with unmodified peers.
pub mod keys {
    /// Carries the contract announcement (list of exported names).
    pub const CONTRACT: &str = "contractId";
    /// Carries the target name of an invocation request.
    pub const FUNCTION: &str = "functionId";
    /// Carries the correlation id of a request or reply.
    pub const SIGNATURE: &str = "signatureId";
    /// Carries the result value of a reply.
    pub const RESULT: &str = "resultId";
    /// Carries the argument list of an invocation request.
    pub const ARGS: &str = "args";
}
