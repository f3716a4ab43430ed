//! Minimal transport usage: an echo server over length-prefixed frames.
//!
//! ```console
//! $ cargo run -p mcpd-net --example echo_server
//! ```

use std::sync::Arc;

use mcpd_net::{
    ConnectionInfo, MessageOutcome, NetResult, ServerTransport, TransportConfig, TransportHandler,
};
use mcpd_runtime::{PoolConfig, ThreadPool};

struct Echo;

impl TransportHandler for Echo {
    fn on_message(&self, conn: &ConnectionInfo, payload: &[u8]) -> NetResult<MessageOutcome> {
        println!("{} sent {} bytes", conn.peer, payload.len());
        Ok(MessageOutcome::respond(payload.to_vec()))
    }
}

fn main() -> NetResult<()> {
    let pool = Arc::new(
        ThreadPool::new(PoolConfig::default()).expect("thread pool"),
    );
    let transport = ServerTransport::new(
        TransportConfig {
            bind_port: 9275,
            ..TransportConfig::default()
        },
        pool,
        Arc::new(Echo),
    )?;
    transport.start()?;
    println!("echoing on {:?}; press ctrl-c to quit", transport.local_addr());

    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
