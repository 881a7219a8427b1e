//! Error types for the AnkiConnect client

use std::fmt;
use thiserror::Error;

/// What went wrong with a single RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Connection refused, reset, DNS failure, ...
    Network,
    /// No response within the per-call timeout.
    Timeout,
    /// Non-success HTTP status.
    Http(u16),
    /// Response body is not the `{result, error}` envelope.
    Protocol,
    /// AnkiConnect answered with a non-null `error`.
    Remote,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcErrorKind::Network => write!(f, "network error"),
            RpcErrorKind::Timeout => write!(f, "timeout"),
            RpcErrorKind::Http(status) => write!(f, "HTTP {}", status),
            RpcErrorKind::Protocol => write!(f, "protocol error"),
            RpcErrorKind::Remote => write!(f, "AnkiConnect error"),
        }
    }
}

/// RPC client error
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Timeout, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Protocol, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Remote, message)
    }

    /// Transport-level failures worth another attempt: network, timeout, 5xx.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            RpcErrorKind::Network | RpcErrorKind::Timeout => true,
            RpcErrorKind::Http(status) => status >= 500,
            RpcErrorKind::Protocol | RpcErrorKind::Remote => false,
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RpcError::timeout(e.to_string())
        } else if e.is_decode() {
            RpcError::protocol(e.to_string())
        } else if let Some(status) = e.status() {
            RpcError::new(RpcErrorKind::Http(status.as_u16()), e.to_string())
        } else {
            RpcError::network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::protocol(e.to_string())
    }
}

/// Result type for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(RpcError::network("refused").is_transient());
        assert!(RpcError::timeout("slow").is_transient());
        assert!(RpcError::new(RpcErrorKind::Http(503), "").is_transient());
        assert!(!RpcError::new(RpcErrorKind::Http(404), "").is_transient());
        assert!(!RpcError::protocol("bad body").is_transient());
        assert!(!RpcError::remote("deck not found").is_transient());
    }

    #[test]
    fn test_display() {
        let err = RpcError::new(RpcErrorKind::Http(500), "Internal Server Error");
        assert_eq!(err.to_string(), "HTTP 500: Internal Server Error");
    }
}
