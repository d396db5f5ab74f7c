//! Error types for the connection module

/// WebSocket connection timeout in seconds
pub(super) const WS_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Errors that can occur while establishing a connection
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectionError {
    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Connection timeout - backend did not respond within {WS_CONNECT_TIMEOUT_SECS} seconds")]
    ConnectTimeout,

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}
