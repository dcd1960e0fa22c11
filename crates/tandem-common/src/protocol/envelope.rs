//! Wire envelope codec.
//!
//! Every unit of wire traffic is a single JSON object classified by
//! which well-known key it carries (see [`keys`](crate::protocol::keys)).
//! A message is exactly one of:
//!
//! - **Contract announcement**: `{"contractId": ["name1", "name2"]}`,
//!   the first payload after open, re-sent on renegotiation.
//! - **Invocation request**: `{"functionId": "hello", "signatureId": 1,
//!   "args": ["x"]}`, the peer invoking a local export.
//! - **Invocation reply**: `{"signatureId": 1, "resultId": "ok"}`, the
//!   reply to a previously issued call.
//!
//! Classification checks `contractId` first, then `functionId`, then
//! `signatureId`: a request and a terminal reply disambiguate only via
//! the presence of `functionId`.
//!
//! Decoding is lenient by design: malformed or unclassifiable input
//! yields [`Decoded::Empty`] instead of an error, so a bad frame is
//! ignored and the connection keeps working.

use crate::protocol::{keys, Contract};
use serde_json::{Map, Value};

/// One decoded unit of wire traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Contract announcement: the function names the peer exposes.
    Contract(Contract),
    /// Invocation request: the peer calling a local export.
    Invoke {
        /// Target export name.
        function: String,
        /// Correlation id to echo back in the reply.
        signature: u64,
        /// Call arguments.
        args: Vec<Value>,
    },
    /// Invocation reply: the result of a previously issued call.
    Reply {
        /// Correlation id of the originating call.
        signature: u64,
        /// Result value.
        result: Value,
    },
}

/// Outcome of decoding one wire frame.
///
/// Malformed payloads are not errors: the lenient-parse policy is part
/// of the protocol, expressed here as an explicit variant rather than
/// a swallowed exception.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed protocol message.
    Frame(Envelope),
    /// Anything that is not a protocol message; ignored by the session.
    Empty,
}

impl Envelope {
    /// Builds an invocation request envelope.
    pub fn invoke(function: impl Into<String>, signature: u64, args: Vec<Value>) -> Self {
        Envelope::Invoke {
            function: function.into(),
            signature,
            args,
        }
    }

    /// Builds an invocation reply envelope.
    pub fn reply(signature: u64, result: Value) -> Self {
        Envelope::Reply { signature, result }
    }

    /// Encodes the envelope to a single textual JSON line.
    ///
    /// # Example
    ///
    /// ```
    /// use tandem_common::protocol::Envelope;
    /// use serde_json::json;
    ///
    /// let frame = Envelope::reply(1, json!("ok")).encode();
    /// let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
    /// assert_eq!(parsed["signatureId"], json!(1));
    /// assert_eq!(parsed["resultId"], json!("ok"));
    /// ```
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        match self {
            Envelope::Contract(names) => {
                obj.insert(
                    keys::CONTRACT.to_string(),
                    Value::Array(names.iter().map(|n| Value::String(n.clone())).collect()),
                );
            }
            Envelope::Invoke {
                function,
                signature,
                args,
            } => {
                obj.insert(keys::FUNCTION.to_string(), Value::String(function.clone()));
                obj.insert(keys::SIGNATURE.to_string(), Value::from(*signature));
                obj.insert(keys::ARGS.to_string(), Value::Array(args.clone()));
            }
            Envelope::Reply { signature, result } => {
                obj.insert(keys::SIGNATURE.to_string(), Value::from(*signature));
                obj.insert(keys::RESULT.to_string(), result.clone());
            }
        }
        Value::Object(obj).to_string()
    }

    /// Decodes one textual frame.
    ///
    /// Never returns an error: non-JSON input, non-object JSON, and
    /// objects carrying none of the protocol keys all come back as
    /// [`Decoded::Empty`].
    ///
    /// # Example
    ///
    /// ```
    /// use tandem_common::protocol::{Decoded, Envelope};
    ///
    /// assert_eq!(Envelope::decode("not json {"), Decoded::Empty);
    ///
    /// let decoded = Envelope::decode(r#"{"contractId":["hello"]}"#);
    /// assert_eq!(
    ///     decoded,
    ///     Decoded::Frame(Envelope::Contract(vec!["hello".to_string()]))
    /// );
    /// ```
    pub fn decode(raw: &str) -> Decoded {
        let obj = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(obj)) => obj,
            _ => return Decoded::Empty,
        };

        // Contract announcements come first: a renegotiating server may
        // reuse a connection that also has calls in flight.
        if let Some(value) = obj.get(keys::CONTRACT) {
            let names = match value {
                Value::Array(items) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => return Decoded::Empty,
            };
            return Decoded::Frame(Envelope::Contract(names));
        }

        // Invocation requests must be checked before replies: both carry
        // a signature id, only requests carry a function id.
        if let Some(function) = obj.get(keys::FUNCTION).and_then(Value::as_str) {
            let signature = match obj.get(keys::SIGNATURE).and_then(Value::as_u64) {
                Some(id) => id,
                None => return Decoded::Empty,
            };
            let args = match obj.get(keys::ARGS) {
                Some(Value::Array(items)) => items.clone(),
                Some(_) => return Decoded::Empty,
                None => Vec::new(),
            };
            return Decoded::Frame(Envelope::Invoke {
                function: function.to_string(),
                signature,
                args,
            });
        }

        if let Some(signature) = obj.get(keys::SIGNATURE).and_then(Value::as_u64) {
            let result = obj.get(keys::RESULT).cloned().unwrap_or(Value::Null);
            return Decoded::Frame(Envelope::Reply { signature, result });
        }

        Decoded::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_json(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn test_encode_contract() {
        let env = Envelope::Contract(vec!["hello".into(), "add".into()]);
        assert_eq!(as_json(&env.encode()), json!({"contractId": ["hello", "add"]}));
    }

    #[test]
    fn test_encode_invoke() {
        let env = Envelope::invoke("hello", 1, vec![json!("x")]);
        assert_eq!(
            as_json(&env.encode()),
            json!({"functionId": "hello", "signatureId": 1, "args": ["x"]})
        );
    }

    #[test]
    fn test_encode_reply() {
        let env = Envelope::reply(1, json!("ok"));
        assert_eq!(
            as_json(&env.encode()),
            json!({"signatureId": 1, "resultId": "ok"})
        );
    }

    #[test]
    fn test_decode_contract() {
        let decoded = Envelope::decode(r#"{"contractId":["hello","add"]}"#);
        assert_eq!(
            decoded,
            Decoded::Frame(Envelope::Contract(vec!["hello".into(), "add".into()]))
        );
    }

    #[test]
    fn test_decode_invoke() {
        let decoded = Envelope::decode(r#"{"functionId":"hello","signatureId":1,"args":["x"]}"#);
        assert_eq!(
            decoded,
            Decoded::Frame(Envelope::invoke("hello", 1, vec![json!("x")]))
        );
    }

    #[test]
    fn test_decode_invoke_without_args() {
        let decoded = Envelope::decode(r#"{"functionId":"ping","signatureId":7}"#);
        assert_eq!(decoded, Decoded::Frame(Envelope::invoke("ping", 7, vec![])));
    }

    #[test]
    fn test_decode_reply() {
        let decoded = Envelope::decode(r#"{"signatureId":1,"resultId":"ok"}"#);
        assert_eq!(decoded, Decoded::Frame(Envelope::reply(1, json!("ok"))));
    }

    #[test]
    fn test_decode_reply_without_result_is_null() {
        let decoded = Envelope::decode(r#"{"signatureId":3}"#);
        assert_eq!(decoded, Decoded::Frame(Envelope::reply(3, Value::Null)));
    }

    #[test]
    fn test_contract_takes_precedence_over_other_keys() {
        // A frame carrying several protocol keys classifies as a contract.
        let decoded =
            Envelope::decode(r#"{"contractId":["a"],"functionId":"f","signatureId":1}"#);
        assert_eq!(decoded, Decoded::Frame(Envelope::Contract(vec!["a".into()])));
    }

    #[test]
    fn test_invoke_takes_precedence_over_reply() {
        let decoded = Envelope::decode(r#"{"functionId":"f","signatureId":2,"resultId":"x"}"#);
        assert!(matches!(
            decoded,
            Decoded::Frame(Envelope::Invoke { signature: 2, .. })
        ));
    }

    #[test]
    fn test_decode_malformed_json_is_empty() {
        assert_eq!(Envelope::decode("not json at all"), Decoded::Empty);
        assert_eq!(Envelope::decode(r#"{"signatureId":"#), Decoded::Empty);
        assert_eq!(Envelope::decode(""), Decoded::Empty);
    }

    #[test]
    fn test_decode_non_object_is_empty() {
        assert_eq!(Envelope::decode("42"), Decoded::Empty);
        assert_eq!(Envelope::decode(r#"["contractId"]"#), Decoded::Empty);
        assert_eq!(Envelope::decode("null"), Decoded::Empty);
    }

    #[test]
    fn test_decode_unknown_shape_is_empty() {
        assert_eq!(Envelope::decode(r#"{"hello":"world"}"#), Decoded::Empty);
    }

    #[test]
    fn test_decode_contract_skips_non_string_names() {
        let decoded = Envelope::decode(r#"{"contractId":["a",1,null,"b"]}"#);
        assert_eq!(
            decoded,
            Decoded::Frame(Envelope::Contract(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn test_decode_invoke_without_signature_is_empty() {
        assert_eq!(Envelope::decode(r#"{"functionId":"f"}"#), Decoded::Empty);
    }
}
