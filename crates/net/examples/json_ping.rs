//! A transport handler that parses frames into the worker's arena and
//! answers JSON-RPC pings, showing how mcpd-proto plugs into mcpd-net.
//!
//! ```console
//! $ cargo run -p mcpd-net --example json_ping
//! ```

use std::sync::Arc;

use mcpd_memory::current;
use mcpd_net::{
    ConnectionInfo, MessageOutcome, NetResult, ServerTransport, TransportConfig, TransportHandler,
};
use mcpd_proto::rpc::{self, Incoming, METHOD_NOT_FOUND, PARSE_ERROR, RpcMessage};
use mcpd_runtime::{PoolConfig, ThreadPool};

struct Ping;

impl TransportHandler for Ping {
    fn on_message(&self, _conn: &ConnectionInfo, payload: &[u8]) -> NetResult<MessageOutcome> {
        // The transport reset this worker's arena right before the callback.
        let response = current::with(|arena| match rpc::parse_message(arena, payload) {
            Ok(Incoming::Single(RpcMessage::Request(req))) if req.method == "ping" => {
                rpc::success_response(req.id, "\"pong\"")
            }
            Ok(Incoming::Single(RpcMessage::Request(req))) => {
                rpc::error_response(Some(req.id), METHOD_NOT_FOUND, "method not found")
            }
            Ok(_) => rpc::error_response(None, METHOD_NOT_FOUND, "expected a request"),
            Err(_) => rpc::error_response(None, PARSE_ERROR, "parse error"),
        });
        Ok(MessageOutcome::respond(response.into_bytes()))
    }
}

fn main() -> NetResult<()> {
    let pool = Arc::new(
        ThreadPool::new(PoolConfig::default()).expect("thread pool"),
    );
    let transport = ServerTransport::new(TransportConfig::default(), pool, Arc::new(Ping))?;
    transport.start()?;
    println!("ping me on {:?}", transport.local_addr());

    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
