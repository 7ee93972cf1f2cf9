//! Error types for the invocation channel and client proxies.

use thiserror::Error;

use crate::protocol::ErrorResponse;

/// Errors returned by channel calls and proxy methods.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("server disconnected")]
    Disconnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {}: {}", .0.error, .0.message)]
    Server(ErrorResponse),

    #[error("not implemented: {method}")]
    NotImplemented { method: &'static str },
}

impl ClientError {
    /// Wire error kind reported by the server, if this is a server error.
    pub fn kind(&self) -> Option<&str> {
        match self {
            ClientError::Server(resp) => Some(&resp.error),
            _ => None,
        }
    }

    /// True for failures the caller can retry once the connection is back.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Disconnected)
            || self.kind() == Some("NotConnected")
    }
}
