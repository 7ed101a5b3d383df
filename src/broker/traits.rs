//! # Broker Link Traits
//!
//! Provider-agnostic contracts for the three broker objects: the link that
//! opens connections, the connection that opens channels, and the channel
//! that declares queues, publishes and consumes.

use async_trait::async_trait;

use super::errors::BrokerResult;
use super::types::{DeliveryStream, Message, QueueDeclared, QueueSpec};

/// Entry point of a broker provider
///
/// A link only knows how to reach a broker. Connections it opens are owned by
/// the caller and are never shared with unrelated links.
#[async_trait]
pub trait BrokerLink: Send + Sync + 'static {
    type Connection: LinkConnection;

    /// Establish a transport session with the broker at `url`
    async fn open(&self, url: &str) -> BrokerResult<Self::Connection>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// A live transport session
#[async_trait]
pub trait LinkConnection: Send + Sync + 'static {
    type Channel: LinkChannel;

    /// Open a logical channel bound to this connection
    async fn channel(&self) -> BrokerResult<Self::Channel>;

    /// Close the session; channels opened on it close with it
    async fn close(&self) -> BrokerResult<()>;

    fn is_connected(&self) -> bool;
}

/// A logical channel on a connection
#[async_trait]
pub trait LinkChannel: Send + Sync + 'static {
    /// Declare a queue
    ///
    /// Redeclaring with the same durability is a no-op. Redeclaring with a
    /// different durability fails with `BrokerError::DurabilityMismatch` and
    /// leaves the existing queue untouched.
    async fn declare_queue(&self, queue: &QueueSpec) -> BrokerResult<QueueDeclared>;

    /// Publish one message to its queue through the default exchange
    async fn publish(&self, message: &Message) -> BrokerResult<()>;

    /// Bound the number of unacknowledged deliveries on this channel
    ///
    /// Zero means unbounded.
    async fn set_prefetch(&self, prefetch_count: u16) -> BrokerResult<()>;

    /// Register a consumer and stream its deliveries in arrival order
    async fn consume(&self, queue_name: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream>;

    /// Close the channel; unacknowledged deliveries return to their queue
    async fn close(&self) -> BrokerResult<()>;

    fn is_open(&self) -> bool;
}
