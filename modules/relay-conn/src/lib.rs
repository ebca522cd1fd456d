//! One WebSocket session per relay: connect, subscribe, receive, close.

mod connection;
mod error;
mod message;

pub use connection::{RelayConnection, WsConnector};
pub use error::{ConnectionError, RelayError};
pub use message::{ClientMessage, RelayMessage, SubscriptionId};

use async_trait::async_trait;
use dvmscan_core::FilterSet;
use std::time::Duration;

/// Opens relay sessions. The scan orchestrator is generic over this so it can
/// be driven without a network.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: RelayStream;

    async fn connect(&self, url: &str, timeout: Duration) -> Result<Self::Stream, ConnectionError>;
}

/// A connected relay session.
#[async_trait]
pub trait RelayStream: Send + 'static {
    fn url(&self) -> &str;

    /// Send one `REQ` carrying every filter.
    async fn subscribe(&mut self, filters: &[FilterSet]) -> Result<SubscriptionId, ConnectionError>;

    /// Next message from the relay; `None` once the connection is closed.
    /// Only a fresh `connect` restarts a finished stream.
    async fn next_message(&mut self) -> Option<Result<RelayMessage, RelayError>>;

    /// Best-effort shutdown.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}
