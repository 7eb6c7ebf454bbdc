/*!
 * Message bus abstraction.
 *
 * The bridge publishes device attributes to and receives commands from a
 * topic-addressed publish/subscribe bus (MQTT in production). The concrete
 * client is a collaborator; this module only defines the seam.
 */
use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

/// Error type for bus operations
#[derive(Error, Debug)]
pub enum BusError {
    /// The bus client has no connection and cannot queue the request
    #[error("Bus not connected")]
    NotConnected,

    /// A publish was rejected by the client
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A subscription change was rejected by the client
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Topic-addressed publish/subscribe bus.
///
/// Implementations are expected to queue messages published while the
/// connection is down and flush them in order on reconnect, so callers
/// treat `publish` as fire-and-forget.
#[async_trait]
pub trait MessageBus: Send + Sync + Debug {
    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()>;

    /// Subscribe to a topic filter (wildcards allowed)
    async fn subscribe(&self, filter: &str) -> Result<()>;

    /// Unsubscribe from a topic filter
    async fn unsubscribe(&self, filter: &str) -> Result<()>;
}
