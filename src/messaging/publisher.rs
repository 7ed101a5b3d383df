//! # Queue Publisher
//!
//! Declares a queue and publishes one message per call.
//!
//! Each publish runs open connection → open channel → declare queue →
//! publish → close channel → close connection. With the pooled strategy the
//! connection is borrowed from a [`ConnectionPool`] and handed back instead of
//! closed. Whatever was opened before a failure is torn down on a best-effort
//! basis; teardown failures are logged and never replace the original error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::broker::{
    redact_url, BrokerLink, BrokerProvider, BrokerResult, ConnectionPool, ConnectionStrategy,
    LinkChannel, LinkConnection, Message, ProviderConnection, PublishReceipt, QueueSpec,
};
use crate::config::BrokerConfig;

/// Counters describing publisher activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
}

/// Publishes messages to broker queues
#[derive(Debug)]
pub struct QueuePublisher {
    provider: BrokerProvider,
    url: String,
    strategy: ConnectionStrategy,
    pool: Option<ConnectionPool>,
    published: AtomicU64,
    failed: AtomicU64,
}

impl QueuePublisher {
    pub fn new(provider: BrokerProvider, config: &BrokerConfig) -> Self {
        let pool = match config.connection_strategy {
            ConnectionStrategy::PerCall => None,
            ConnectionStrategy::Pooled => {
                Some(ConnectionPool::new(provider.clone(), config.url.clone()))
            }
        };

        Self {
            provider,
            url: config.url.clone(),
            strategy: config.connection_strategy,
            pool,
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Publisher over the provider selected by configuration
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(BrokerProvider::from_config(config), config)
    }

    pub fn strategy(&self) -> ConnectionStrategy {
        self.strategy
    }

    /// Publish a UTF-8 text payload
    pub async fn publish_text(
        &self,
        queue: &QueueSpec,
        text: &str,
    ) -> BrokerResult<PublishReceipt> {
        self.publish(&Message::text(queue.clone(), text)).await
    }

    /// Declare the message's queue and publish the message
    pub async fn publish(&self, message: &Message) -> BrokerResult<PublishReceipt> {
        let result = match &self.pool {
            None => self.publish_per_call(message).await,
            Some(pool) => Self::publish_pooled(pool, message).await,
        };

        match &result {
            Ok(receipt) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                info!(
                    queue_name = %receipt.queue_name,
                    message_id = %receipt.message_id,
                    payload_bytes = receipt.payload_bytes,
                    durable = receipt.durable,
                    "Message published"
                );
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    queue_name = %message.queue_name(),
                    stage = e.stage(),
                    broker_url = %redact_url(&self.url),
                    error = %e,
                    "Failed to publish message"
                );
            }
        }

        result
    }

    async fn publish_per_call(&self, message: &Message) -> BrokerResult<PublishReceipt> {
        let connection = self.provider.open(&self.url).await?;

        let result = publish_on(&connection, message).await;

        if let Err(e) = connection.close().await {
            warn!(
                queue_name = %message.queue_name(),
                error = %e,
                "Failed to close broker connection after publish"
            );
        }

        result
    }

    async fn publish_pooled(
        pool: &ConnectionPool,
        message: &Message,
    ) -> BrokerResult<PublishReceipt> {
        let connection = pool.acquire().await?;

        let result = publish_on(&connection, message).await;

        if let Err(e) = &result {
            if e.is_connection_level() {
                debug!(error = %e, "Invalidating pooled connection after failure");
                pool.invalidate(&connection).await;
            }
        }
        pool.release(connection);

        result
    }

    /// Close the pooled connection, if any
    pub async fn shutdown(&self) -> BrokerResult<()> {
        match &self.pool {
            Some(pool) => pool.close().await,
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

async fn publish_on(
    connection: &ProviderConnection,
    message: &Message,
) -> BrokerResult<PublishReceipt> {
    let channel = connection.channel().await?;

    let outcome = async {
        channel.declare_queue(message.queue()).await?;
        channel.publish(message).await
    }
    .await;

    // A failed close never turns a successful publish into a failure
    if let Err(e) = channel.close().await {
        warn!(
            queue_name = %message.queue_name(),
            error = %e,
            "Failed to close broker channel after publish"
        );
    }

    outcome.map(|()| PublishReceipt::for_message(message))
}

/// Shared handle used by the web layer
pub type SharedPublisher = Arc<QueuePublisher>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, InMemoryBroker};

    fn publisher(broker: &InMemoryBroker, strategy: ConnectionStrategy) -> QueuePublisher {
        let config = BrokerConfig {
            connection_strategy: strategy,
            ..BrokerConfig::in_memory()
        };
        QueuePublisher::new(BrokerProvider::InMemory(broker.clone()), &config)
    }

    fn messages() -> QueueSpec {
        QueueSpec::transient("messages").unwrap()
    }

    #[tokio::test]
    async fn test_publish_declares_and_enqueues() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker, ConnectionStrategy::PerCall);

        let receipt = publisher.publish_text(&messages(), "ping").await.unwrap();

        assert_eq!(receipt.queue_name, "messages");
        assert_eq!(receipt.payload_bytes, 4);
        assert!(!receipt.durable);
        assert_eq!(broker.ready_count("messages"), 1);
        assert_eq!(broker.queue_durability("messages"), Some(false));
        assert_eq!(publisher.stats().published, 1);
    }

    #[tokio::test]
    async fn test_publish_fails_when_broker_unreachable() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let publisher = publisher(&broker, ConnectionStrategy::PerCall);

        let result = publisher.publish_text(&messages(), "ping").await;

        assert!(matches!(result, Err(BrokerError::Connect { .. })));
        assert_eq!(publisher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_durability_conflict_is_reported_and_nothing_published() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker, ConnectionStrategy::PerCall);
        publisher.publish_text(&messages(), "first").await.unwrap();

        let durable = QueueSpec::new("messages", true).unwrap();
        let result = publisher.publish_text(&durable, "second").await;

        assert!(matches!(result, Err(BrokerError::DurabilityMismatch { .. })));
        assert_eq!(broker.published_count("messages"), 1);
        assert_eq!(broker.queue_durability("messages"), Some(false));
    }

    #[tokio::test]
    async fn test_per_call_tears_down_after_success_and_failure() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker, ConnectionStrategy::PerCall);

        publisher.publish_text(&messages(), "ok").await.unwrap();
        assert_eq!(broker.open_connection_count(), 0);
        assert_eq!(broker.open_channel_count(), 0);

        let durable = QueueSpec::new("messages", true).unwrap();
        assert!(publisher.publish_text(&durable, "rejected").await.is_err());
        assert_eq!(broker.open_connection_count(), 0);
        assert_eq!(broker.open_channel_count(), 0);
    }

    #[tokio::test]
    async fn test_pooled_keeps_connection_but_closes_channels() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker, ConnectionStrategy::Pooled);

        for text in ["one", "two"] {
            publisher.publish_text(&messages(), text).await.unwrap();
        }
        assert_eq!(broker.open_connection_count(), 1);
        assert_eq!(broker.open_channel_count(), 0);

        publisher.shutdown().await.unwrap();
        assert_eq!(broker.open_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_pooled_publisher_recovers_after_outage() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker, ConnectionStrategy::Pooled);

        publisher.publish_text(&messages(), "one").await.unwrap();

        broker.set_available(false);
        assert!(publisher.publish_text(&messages(), "lost").await.is_err());

        broker.set_available(true);
        publisher.publish_text(&messages(), "two").await.unwrap();

        assert_eq!(broker.published_count("messages"), 2);
        publisher.shutdown().await.unwrap();
    }
}
