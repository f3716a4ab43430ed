//! The JSON-RPC dispatch table.
//!
//! Messages arrive as raw frame payloads on a pool worker; the dispatcher
//! parses them into the worker's arena (already reset by the transport),
//! routes requests by method name, and encodes responses. Built-in methods
//! cover the MCP basics: `initialize`, `ping`, `tools/list` and `tools/call`
//! with one `echo` tool.

use std::collections::HashMap;

use mcpd_memory::{Arena, current};
use mcpd_net::{ConnectionInfo, MessageOutcome, NetResult, RateLimiter, TransportHandler};
use mcpd_proto::rpc::{
    self, Incoming, RpcMessage, RpcNotification, RpcRequest, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use mcpd_proto::writer::quote;
use mcpd_proto::{ProtoError, Value};
use tracing::{debug, warn};

/// Server-defined JSON-RPC error code for rate-limited clients.
pub const RATE_LIMITED: i64 = -32000;

/// What a method handler produced.
pub enum DispatchResult {
    /// Raw JSON to embed as the `result` member.
    Result(String),
    /// An application-level error.
    Error { code: i64, message: String },
}

impl DispatchResult {
    /// Convenience constructor for error results.
    #[must_use]
    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

type HandlerFn = dyn Fn(&RpcRequest<'_>) -> DispatchResult + Send + Sync;

/// Method-keyed dispatch table; implements the transport callback.
pub struct Dispatcher {
    methods: HashMap<String, Box<HandlerFn>>,
    limiter: Option<RateLimiter>,
}

impl Dispatcher {
    /// An empty table (no built-ins), mostly useful in tests.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            methods: HashMap::new(),
            limiter: None,
        }
    }

    /// The standard table: `initialize`, `ping`, `tools/list`, `tools/call`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register("initialize", |_req| {
            DispatchResult::Result(
                concat!(
                    r#"{"protocolVersion":"2024-11-05","#,
                    r#""serverInfo":{"name":"mcpd","version":"0.1.0"},"#,
                    r#""capabilities":{"tools":{}}}"#
                )
                .to_string(),
            )
        });
        dispatcher.register("ping", |_req| DispatchResult::Result("\"pong\"".to_string()));
        dispatcher.register("tools/list", |_req| {
            DispatchResult::Result(
                concat!(
                    r#"{"tools":[{"name":"echo","#,
                    r#""description":"Echoes its arguments back.","#,
                    r#""inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}}]}"#
                )
                .to_string(),
            )
        });
        dispatcher.register("tools/call", tool_call);
        dispatcher
    }

    /// Attaches a per-client rate limiter (keyed by peer IP).
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Registers (or replaces) a method handler.
    pub fn register(
        &mut self,
        method: impl Into<String>,
        handler: impl Fn(&RpcRequest<'_>) -> DispatchResult + Send + Sync + 'static,
    ) {
        self.methods.insert(method.into(), Box::new(handler));
    }

    /// Parses and routes one payload. `None` means no response goes out
    /// (notifications, or responses we merely observe).
    fn dispatch(&self, arena: &Arena, payload: &[u8]) -> Option<String> {
        match rpc::parse_message(arena, payload) {
            Err(err @ ProtoError::Parse { .. }) => {
                debug!(error = %err, "rejecting malformed payload");
                Some(rpc::error_response(None, PARSE_ERROR, "parse error"))
            }
            Err(ProtoError::InvalidRequest { reason }) => {
                Some(rpc::error_response(None, INVALID_REQUEST, reason))
            }
            Err(ProtoError::Allocation(err)) => {
                warn!(error = %err, "arena allocation failed during parse");
                Some(rpc::error_response(None, INTERNAL_ERROR, "out of memory"))
            }
            Err(err) => {
                warn!(error = %err, "unexpected protocol error");
                Some(rpc::error_response(None, INTERNAL_ERROR, "internal error"))
            }
            Ok(Incoming::Single(message)) => self.dispatch_one(&message),
            Ok(Incoming::Batch(messages)) => {
                let replies: Vec<String> = messages
                    .iter()
                    .filter_map(|message| self.dispatch_one(message))
                    .collect();
                if replies.is_empty() {
                    None
                } else {
                    Some(format!("[{}]", replies.join(",")))
                }
            }
        }
    }

    fn dispatch_one(&self, message: &RpcMessage<'_>) -> Option<String> {
        match message {
            RpcMessage::Request(request) => Some(self.call(request)),
            RpcMessage::Notification(RpcNotification { method, params }) => {
                // Notifications execute for their side effects; nothing is
                // ever written back.
                if let Some(handler) = self.methods.get(*method) {
                    let _ = handler(&RpcRequest {
                        id: 0,
                        method: *method,
                        params: *params,
                    });
                } else {
                    debug!(method, "notification for unknown method ignored");
                }
                None
            }
            RpcMessage::Response(response) => {
                debug!(id = response.id, "ignoring unsolicited response");
                None
            }
            RpcMessage::Invalid { reason } => {
                Some(rpc::error_response(None, INVALID_REQUEST, reason))
            }
        }
    }

    fn call(&self, request: &RpcRequest<'_>) -> String {
        match self.methods.get(request.method) {
            None => rpc::error_response(Some(request.id), METHOD_NOT_FOUND, "method not found"),
            Some(handler) => match handler(request) {
                DispatchResult::Result(result) => rpc::success_response(request.id, &result),
                DispatchResult::Error { code, message } => {
                    rpc::error_response(Some(request.id), code, &message)
                }
            },
        }
    }
}

impl TransportHandler for Dispatcher {
    fn on_message(&self, conn: &ConnectionInfo, payload: &[u8]) -> NetResult<MessageOutcome> {
        if let Some(limiter) = &self.limiter {
            if !limiter.check(&conn.peer.ip().to_string()).is_allowed() {
                debug!(peer = %conn.peer, "rate limited");
                let response = rpc::error_response(None, RATE_LIMITED, "rate limit exceeded");
                return Ok(MessageOutcome::respond(response.into_bytes()));
            }
        }

        // The transport reset this worker's arena just before the callback;
        // fall back to a scratch arena off pool workers (tests, gateways).
        let response = current::try_with(|arena| self.dispatch(arena, payload))
            .unwrap_or_else(|| self.dispatch(&Arena::default(), payload));

        Ok(match response {
            Some(body) => MessageOutcome::respond(body.into_bytes()),
            None => MessageOutcome::silent(),
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods.len())
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

/// `tools/call`: routes to the named built-in tool.
fn tool_call(request: &RpcRequest<'_>) -> DispatchResult {
    let Some(name) = request
        .params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
    else {
        return DispatchResult::error(INVALID_PARAMS, "params.name must be a string");
    };
    match name {
        "echo" => {
            let text = request
                .params
                .and_then(|p| p.get("arguments"))
                .and_then(|a| a.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("");
            DispatchResult::Result(format!(
                r#"{{"content":[{{"type":"text","text":{}}}]}}"#,
                quote(text)
            ))
        }
        other => DispatchResult::error(INVALID_PARAMS, format!("unknown tool: {other}")),
    }
}
