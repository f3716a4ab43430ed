//! JSON-RPC 2.0 message classification and response encoding.
//!
//! A single message is a Request (has `method` and a numeric `id`), a
//! Notification (`method`, no `id`), or a Response (`id` plus exactly one of
//! `result` / `error`); anything else is Invalid. A top-level array is a
//! batch whose elements classify independently (one bad element does not
//! poison the rest), but an empty batch is an Invalid-Request error for the
//! whole payload.

use mcpd_memory::Arena;

use crate::error::{ProtoError, ProtoResult};
use crate::parser;
use crate::value::Value;
use crate::writer;

/// JSON-RPC protocol version, always emitted.
pub const VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A call expecting a response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcRequest<'a> {
    pub id: u64,
    pub method: &'a str,
    /// Present only when the message carried an object or array `params`.
    pub params: Option<&'a Value<'a>>,
}

/// A call with no `id`; never answered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcNotification<'a> {
    pub method: &'a str,
    pub params: Option<&'a Value<'a>>,
}

/// The `result` / `error` alternative of a response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponsePayload<'a> {
    Result(&'a Value<'a>),
    Error { code: i64, message: &'a str },
}

/// A response observed on the wire (relevant to gateway and client roles).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcResponse<'a> {
    pub id: u64,
    pub payload: ResponsePayload<'a>,
}

/// One classified JSON-RPC message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RpcMessage<'a> {
    Request(RpcRequest<'a>),
    Notification(RpcNotification<'a>),
    Response(RpcResponse<'a>),
    /// Well-formed JSON that is not a valid JSON-RPC message.
    Invalid { reason: &'static str },
}

/// A parsed payload: either one message or a batch.
#[derive(Debug)]
pub enum Incoming<'a> {
    Single(RpcMessage<'a>),
    Batch(Vec<RpcMessage<'a>>),
}

/// Parses a framed payload and classifies it.
///
/// Syntax errors surface as [`ProtoError::Parse`]; an empty top-level array
/// as [`ProtoError::InvalidRequest`]. Individual invalid batch elements are
/// reported in place as [`RpcMessage::Invalid`].
pub fn parse_message<'a>(arena: &'a Arena, payload: &[u8]) -> ProtoResult<Incoming<'a>> {
    let root = parser::parse(arena, payload)?;
    match root {
        Value::Array(elements) => {
            if elements.is_empty() {
                return Err(ProtoError::invalid_request("empty batch"));
            }
            Ok(Incoming::Batch(
                elements.iter().copied().map(classify).collect(),
            ))
        }
        _ => Ok(Incoming::Single(classify(root))),
    }
}

/// Classifies one JSON value as a JSON-RPC message.
#[must_use]
pub fn classify<'a>(value: &'a Value<'a>) -> RpcMessage<'a> {
    let Some(members) = value.as_object() else {
        return RpcMessage::Invalid {
            reason: "message is not an object",
        };
    };

    let id = members.get("id").copied();
    let method = members.get("method").copied();

    if let Some(method_value) = method {
        let Some(method) = method_value.as_str() else {
            return RpcMessage::Invalid {
                reason: "method is not a string",
            };
        };
        let params = match members.get("params").copied() {
            None => None,
            Some(p) if p.is_container() => Some(p),
            Some(_) => {
                return RpcMessage::Invalid {
                    reason: "params is neither object nor array",
                };
            }
        };
        return match id {
            None => RpcMessage::Notification(RpcNotification { method, params }),
            Some(id_value) => match id_value.as_u64() {
                Some(id) => RpcMessage::Request(RpcRequest { id, method, params }),
                None => RpcMessage::Invalid {
                    reason: "id is not an unsigned integer",
                },
            },
        };
    }

    // No method: this can only be a response.
    let Some(id) = id.and_then(|v| v.as_u64()) else {
        return RpcMessage::Invalid {
            reason: "message has neither method nor numeric id",
        };
    };
    let result = members.get("result").copied();
    let error = members.get("error").copied();
    match (result, error) {
        (Some(result), None) => RpcMessage::Response(RpcResponse {
            id,
            payload: ResponsePayload::Result(result),
        }),
        (None, Some(error)) => {
            let code = error.get("code").and_then(Value::as_f64);
            let message = error.get("message").and_then(Value::as_str);
            match (code, message) {
                (Some(code), Some(message)) if code.fract() == 0.0 => {
                    RpcMessage::Response(RpcResponse {
                        id,
                        payload: ResponsePayload::Error {
                            code: code as i64,
                            message,
                        },
                    })
                }
                _ => RpcMessage::Invalid {
                    reason: "error object must carry integer code and string message",
                },
            }
        }
        (Some(_), Some(_)) => RpcMessage::Invalid {
            reason: "response carries both result and error",
        },
        (None, None) => RpcMessage::Invalid {
            reason: "response carries neither result nor error",
        },
    }
}

/// Encodes a success response. `result_json` must already be valid JSON
/// (typically a [`crate::writer::stringify`] product or a literal).
#[must_use]
pub fn success_response(id: u64, result_json: &str) -> String {
    format!(r#"{{"jsonrpc":"{VERSION}","id":{id},"result":{result_json}}}"#)
}

/// Encodes an error response. `id` is `null` when the request id never
/// became known (e.g. parse errors).
#[must_use]
pub fn error_response(id: Option<u64>, code: i64, message: &str) -> String {
    let mut escaped = String::with_capacity(message.len() + 2);
    writer::write_string(&mut escaped, message);
    match id {
        Some(id) => format!(
            r#"{{"jsonrpc":"{VERSION}","id":{id},"error":{{"code":{code},"message":{escaped}}}}}"#
        ),
        None => format!(
            r#"{{"jsonrpc":"{VERSION}","id":null,"error":{{"code":{code},"message":{escaped}}}}}"#
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn arena() -> Arena {
        Arena::default()
    }

    #[test]
    fn classifies_request() {
        let arena = arena();
        let incoming = parse_message(
            &arena,
            br#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#,
        )
        .unwrap();
        match incoming {
            Incoming::Single(RpcMessage::Request(req)) => {
                assert_eq!(req.id, 1);
                assert_eq!(req.method, "ping");
                assert!(req.params.is_some());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn classifies_notification() {
        let arena = arena();
        let incoming = parse_message(
            &arena,
            br#"{"jsonrpc":"2.0","method":"progress","params":[1,2]}"#,
        )
        .unwrap();
        assert!(matches!(
            incoming,
            Incoming::Single(RpcMessage::Notification(RpcNotification {
                method: "progress",
                ..
            }))
        ));
    }

    #[test]
    fn classifies_responses() {
        let arena = arena();
        let ok = parse_message(&arena, br#"{"jsonrpc":"2.0","id":7,"result":"pong"}"#).unwrap();
        assert!(matches!(
            ok,
            Incoming::Single(RpcMessage::Response(RpcResponse {
                id: 7,
                payload: ResponsePayload::Result(_),
            }))
        ));

        let err = parse_message(
            &arena,
            br#"{"jsonrpc":"2.0","id":8,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        match err {
            Incoming::Single(RpcMessage::Response(RpcResponse {
                id: 8,
                payload: ResponsePayload::Error { code, message },
            })) => {
                assert_eq!(code, METHOD_NOT_FOUND);
                assert_eq!(message, "nope");
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn invalid_shapes_are_flagged() {
        let arena = arena();
        let cases: [(&[u8], &str); 8] = [
            (br#"42"#, "not an object"),
            (br#"{"id":1}"#, "neither method nor result"),
            (br#"{"method":5,"id":1}"#, "method not a string"),
            (br#"{"method":"x","id":"s"}"#, "string id"),
            (br#"{"method":"x","id":-1}"#, "negative id"),
            (br#"{"method":"x","id":1,"params":3}"#, "scalar params"),
            (br#"{"id":3,"result":1,"error":{}}"#, "both result and error"),
            (
                br#"{"id":3,"error":{"code":"x","message":"m"}}"#,
                "non-integer code",
            ),
        ];
        for (payload, why) in cases {
            let incoming = parse_message(&arena, payload).unwrap();
            assert!(
                matches!(incoming, Incoming::Single(RpcMessage::Invalid { .. })),
                "{why}: expected invalid"
            );
        }
    }

    #[test]
    fn batches_classify_element_wise() {
        let arena = arena();
        let incoming = parse_message(
            &arena,
            br#"[{"id":1,"method":"a"},"junk",{"method":"note"}]"#,
        )
        .unwrap();
        let Incoming::Batch(messages) = incoming else {
            panic!("expected batch");
        };
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], RpcMessage::Request(_)));
        assert!(matches!(messages[1], RpcMessage::Invalid { .. }));
        assert!(matches!(messages[2], RpcMessage::Notification(_)));
    }

    #[test]
    fn empty_batch_is_invalid_request() {
        let arena = arena();
        let err = parse_message(&arena, b"[]").unwrap_err();
        assert_eq!(err.code(), "PROTO:RPC:INVALID");
    }

    #[test]
    fn response_encoding_matches_the_wire_format() {
        assert_eq!(
            success_response(1, "\"pong\""),
            r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#
        );
        assert_eq!(
            error_response(Some(2), METHOD_NOT_FOUND, "method not found"),
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"method not found"}}"#
        );
        assert_eq!(
            error_response(None, PARSE_ERROR, "parse error"),
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"parse error"}}"#
        );
    }

    #[test]
    fn error_messages_are_escaped() {
        let encoded = error_response(Some(1), INTERNAL_ERROR, "broken \"quote\"\n");
        assert!(encoded.contains(r#"\"quote\"\n"#));
    }

    #[test]
    fn large_ids_survive() {
        let arena = arena();
        // 2^53 is still integral in f64.
        let incoming = parse_message(
            &arena,
            br#"{"jsonrpc":"2.0","id":9007199254740992,"method":"ping"}"#,
        )
        .unwrap();
        match incoming {
            Incoming::Single(RpcMessage::Request(req)) => {
                assert_eq!(req.id, 9_007_199_254_740_992);
            }
            other => panic!("expected request, got {other:?}"),
        }
    }
}
