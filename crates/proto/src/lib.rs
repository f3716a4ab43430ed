//! # mcpd-proto
//!
//! The wire-facing half of mcpd: a lazy JSON DOM whose nodes live in a
//! per-worker [`mcpd_memory::Arena`], a recursive-descent parser with a hard
//! depth limit, a stringifier producing heap-owned output, and JSON-RPC 2.0
//! message classification.
//!
//! Parsed values borrow from the arena ([`Value<'a>`](Value)), so nothing
//! parsed on a pool worker can outlive that worker's per-request reset;
//! the borrow checker enforces what the C lineage of this code kept as a
//! "don't free arena nodes" convention.

pub mod error;
pub mod parser;
pub mod rpc;
pub mod value;
pub mod writer;

pub use crate::error::{ParseErrorKind, ProtoError, ProtoResult};
pub use crate::parser::parse;
pub use crate::value::Value;
pub use crate::writer::stringify;

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::error::{ProtoError, ProtoResult};
    pub use crate::parser::parse;
    pub use crate::rpc::{self, Incoming, RpcMessage, RpcRequest};
    pub use crate::value::Value;
    pub use crate::writer::stringify;
}
