//! Error types for mcpd-proto.

use mcpd_memory::MemoryError;
use thiserror::Error;

/// Why a JSON document was rejected.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected character")]
    UnexpectedChar,
    #[error("malformed number")]
    InvalidNumber,
    #[error("invalid escape sequence")]
    InvalidEscape,
    #[error("invalid unicode escape")]
    InvalidUnicode,
    #[error("input is not valid UTF-8")]
    InvalidUtf8,
    #[error("nesting exceeds the depth limit")]
    DepthExceeded,
    #[error("trailing bytes after the document")]
    TrailingData,
}

/// Protocol-layer errors: JSON syntax, JSON-RPC validation, allocation.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// The payload is not well-formed JSON. `offset` is the byte position
    /// the parser stopped at.
    #[error("JSON parse error at byte {offset}: {kind}")]
    Parse { offset: usize, kind: ParseErrorKind },

    /// The payload is well-formed JSON but not a valid JSON-RPC message.
    #[error("invalid JSON-RPC request: {reason}")]
    InvalidRequest { reason: &'static str },

    /// Arena allocation failed while building the DOM.
    #[error(transparent)]
    Allocation(#[from] MemoryError),
}

impl ProtoError {
    /// Stable error code for categorization and logging.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "PROTO:JSON:PARSE",
            Self::InvalidRequest { .. } => "PROTO:RPC:INVALID",
            Self::Allocation(_) => "PROTO:ALLOC",
        }
    }

    /// Create a parse error at `offset`.
    #[must_use]
    pub fn parse(offset: usize, kind: ParseErrorKind) -> Self {
        Self::Parse { offset, kind }
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(reason: &'static str) -> Self {
        Self::InvalidRequest { reason }
    }
}

/// Result type for protocol operations.
pub type ProtoResult<T> = core::result::Result<T, ProtoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_carry_offsets() {
        let err = ProtoError::parse(17, ParseErrorKind::UnexpectedChar);
        assert_eq!(err.code(), "PROTO:JSON:PARSE");
        assert!(err.to_string().contains("byte 17"));
    }
}
