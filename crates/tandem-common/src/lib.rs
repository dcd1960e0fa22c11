//! Tandem Common Protocol Types
//!
//! This crate provides the wire protocol shared by both halves of the
//! Tandem bidirectional RPC session protocol.
//!
//! # Overview
//!
//! Tandem runs symmetric RPC over a single persistent duplex channel:
//! a local process calls functions exposed by a remote peer, and the
//! peer calls functions exported locally, using a contract negotiated
//! at connection time rather than a statically compiled interface.
//! This crate contains the pieces any endpoint needs:
//!
//! - **Envelope codec**: the three wire message kinds (contract
//!   announcement, invocation request, invocation reply) and their
//!   lenient textual JSON encoding
//! - **Error taxonomy**: [`TandemError`] and the crate-wide [`Result`]
//!
//! # Wire Format
//!
//! One JSON object per message, classified by which well-known key it
//! carries (`contractId`, `functionId`, `signatureId`, checked in that
//! precedence order). Malformed frames decode to [`Decoded::Empty`]
//! and are ignored rather than surfaced as errors.
//!
//! # Example
//!
//! ```
//! use tandem_common::{Decoded, Envelope};
//! use serde_json::json;
//!
//! let frame = Envelope::invoke("hello", 1, vec![json!("x")]).encode();
//! match Envelope::decode(&frame) {
//!     Decoded::Frame(Envelope::Invoke { function, .. }) => assert_eq!(function, "hello"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

pub mod protocol;

pub use protocol::*;
