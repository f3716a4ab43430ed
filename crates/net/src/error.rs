//! Error types for mcpd-net.

use thiserror::Error;

/// Transport and socket errors.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// Bind failed because the address is taken.
    #[error("address already in use: {addr}")]
    AddressInUse { addr: String },

    /// Host name did not resolve to a usable address.
    #[error("failed to resolve address: {host}")]
    ResolveFailed { host: String },

    /// A socket operation failed.
    #[error("socket {op} failed: {reason}")]
    Socket { op: &'static str, reason: String },

    /// The peer closed the connection (possibly mid-frame).
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A length prefix exceeded the configured maximum.
    #[error("frame of {length} bytes exceeds the {max} byte limit")]
    FrameTooLarge { length: usize, max: usize },

    /// The transport is not in a state that allows the operation.
    #[error("invalid transport state: {reason}")]
    InvalidState { reason: String },

    /// A configuration parameter is zero or out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl NetError {
    /// Stable error code for categorization and logging.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AddressInUse { .. } => "NET:SOCKET:ADDR_IN_USE",
            Self::ResolveFailed { .. } => "NET:SOCKET:RESOLVE",
            Self::Socket { .. } => "NET:SOCKET:IO",
            Self::ConnectionClosed => "NET:CONN:CLOSED",
            Self::FrameTooLarge { .. } => "NET:FRAME:TOO_LARGE",
            Self::InvalidState { .. } => "NET:STATE:INVALID",
            Self::InvalidConfig { .. } => "NET:CONFIG:INVALID",
        }
    }

    /// True for errors that end one connection without affecting the server.
    #[must_use]
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::FrameTooLarge { .. } | Self::Socket { .. }
        )
    }

    /// Create a socket error from an I/O failure.
    pub fn socket(op: &'static str, err: &std::io::Error) -> Self {
        Self::Socket {
            op,
            reason: err.to_string(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type for transport operations.
pub type NetResult<T> = core::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(NetError::ConnectionClosed.code(), "NET:CONN:CLOSED");
        assert_eq!(
            NetError::FrameTooLarge {
                length: 10,
                max: 5
            }
            .code(),
            "NET:FRAME:TOO_LARGE"
        );
    }

    #[test]
    fn connection_scoped_errors_do_not_stop_the_server() {
        assert!(NetError::ConnectionClosed.is_connection_scoped());
        assert!(!NetError::invalid_state("x").is_connection_scoped());
    }
}
