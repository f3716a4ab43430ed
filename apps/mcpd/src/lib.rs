//! # mcpd
//!
//! The MCP server daemon: configuration, the JSON-RPC dispatch table, and
//! the wiring that assembles pool + transport + dispatcher into a running
//! server. The binary in `main.rs` is a thin shell over [`Server`].

pub mod config;
pub mod dispatch;
pub mod server;

pub use crate::config::ServerConfig;
pub use crate::dispatch::{DispatchResult, Dispatcher};
pub use crate::server::Server;
