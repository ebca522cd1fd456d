use dvmscan_core::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Failure of one relay session. Recorded against that relay, never fatal to
/// the scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("no message for {0:?}")]
    Idle(Duration),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("not subscribed")]
    NotSubscribed,
    #[error("scan ended before the relay connected")]
    Cancelled,
}

/// Anything a relay stream can yield besides a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
