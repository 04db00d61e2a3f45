// src/notify/mod.rs - Push notification transport
pub mod protocol;
pub mod pusher;

use async_trait::async_trait;
use thiserror::Error;

pub use pusher::{ConnectionState, PusherConnection};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("not connected to the notification service")]
    NotConnected,
    #[error("notification transport has shut down")]
    Closed,
}

/// What the transport reports to its consumer, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection is up and channels can be subscribed. Fires again after
    /// every reconnect.
    ConnectionEstablished { socket_id: String },
    SubscriptionSucceeded { channel: String },
    ChannelEvent { channel: String, event: String, data: String },
    Disconnected,
}

/// A push-messaging connection.
///
/// `subscribe` only succeeds between a `ConnectionEstablished` and the next
/// `Disconnected`; the channel does not exist on the server before that.
#[async_trait]
pub trait NotificationSource: Send {
    /// Next transport event, or `None` once the transport gave up.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    async fn subscribe(&self, channel: &str) -> Result<(), NotifyError>;
}
