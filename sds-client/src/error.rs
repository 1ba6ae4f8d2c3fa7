//! Client error types.

use sds_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server refused connection")]
    Refused,

    #[error("unexpected handshake response ({0} bytes)")]
    Handshake(usize),

    #[error("login failed: {reason} (code {code})")]
    Login { code: i32, reason: String },

    #[error("server error: {message} (code {code})")]
    Server { code: i32, message: String },
}

impl ClientError {
    /// True for failures where retrying the same call can succeed. Protocol
    /// decode errors and server-side rejections are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout(_) | ClientError::ConnectionClosed
        )
    }
}
