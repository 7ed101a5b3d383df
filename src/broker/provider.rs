//! # Broker Provider Enum
//!
//! Enum dispatch for broker providers, avoiding trait objects on the publish
//! and consume paths while keeping publishers and consumers non-generic.

use async_trait::async_trait;

use super::errors::BrokerResult;
use super::providers::{
    InMemoryBroker, InMemoryChannel, InMemoryConnection, RabbitMqChannel, RabbitMqConnection,
    RabbitMqLink,
};
use super::traits::{BrokerLink, LinkChannel, LinkConnection};
use super::types::{DeliveryStream, Message, QueueDeclared, QueueSpec};
use crate::config::{BrokerBackend, BrokerConfig};

/// Provider enum for broker links
///
/// # Variants
///
/// - `RabbitMq` - AMQP 0.9.1 via lapin
/// - `InMemory` - process-local broker for tests and demos
#[derive(Debug, Clone)]
pub enum BrokerProvider {
    RabbitMq(RabbitMqLink),
    InMemory(InMemoryBroker),
}

impl BrokerProvider {
    /// Build the provider selected by configuration
    ///
    /// The in-memory backend gets a fresh broker; use
    /// [`BrokerProvider::InMemory`] directly to share one between components.
    pub fn from_config(config: &BrokerConfig) -> Self {
        match config.backend {
            BrokerBackend::RabbitMq => Self::RabbitMq(RabbitMqLink::from_config(config)),
            BrokerBackend::InMemory => Self::InMemory(InMemoryBroker::new()),
        }
    }
}

#[async_trait]
impl BrokerLink for BrokerProvider {
    type Connection = ProviderConnection;

    async fn open(&self, url: &str) -> BrokerResult<ProviderConnection> {
        match self {
            Self::RabbitMq(link) => link.open(url).await.map(ProviderConnection::RabbitMq),
            Self::InMemory(broker) => broker.open(url).await.map(ProviderConnection::InMemory),
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::RabbitMq(link) => link.provider_name(),
            Self::InMemory(broker) => broker.provider_name(),
        }
    }
}

/// Connection opened by a [`BrokerProvider`]
#[derive(Debug)]
pub enum ProviderConnection {
    RabbitMq(RabbitMqConnection),
    InMemory(InMemoryConnection),
}

#[async_trait]
impl LinkConnection for ProviderConnection {
    type Channel = ProviderChannel;

    async fn channel(&self) -> BrokerResult<ProviderChannel> {
        match self {
            Self::RabbitMq(c) => c.channel().await.map(ProviderChannel::RabbitMq),
            Self::InMemory(c) => c.channel().await.map(ProviderChannel::InMemory),
        }
    }

    async fn close(&self) -> BrokerResult<()> {
        match self {
            Self::RabbitMq(c) => c.close().await,
            Self::InMemory(c) => c.close().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::RabbitMq(c) => c.is_connected(),
            Self::InMemory(c) => c.is_connected(),
        }
    }
}

/// Channel opened on a [`ProviderConnection`]
#[derive(Debug)]
pub enum ProviderChannel {
    RabbitMq(RabbitMqChannel),
    InMemory(InMemoryChannel),
}

#[async_trait]
impl LinkChannel for ProviderChannel {
    async fn declare_queue(&self, queue: &QueueSpec) -> BrokerResult<QueueDeclared> {
        match self {
            Self::RabbitMq(c) => c.declare_queue(queue).await,
            Self::InMemory(c) => c.declare_queue(queue).await,
        }
    }

    async fn publish(&self, message: &Message) -> BrokerResult<()> {
        match self {
            Self::RabbitMq(c) => c.publish(message).await,
            Self::InMemory(c) => c.publish(message).await,
        }
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> BrokerResult<()> {
        match self {
            Self::RabbitMq(c) => c.set_prefetch(prefetch_count).await,
            Self::InMemory(c) => c.set_prefetch(prefetch_count).await,
        }
    }

    async fn consume(&self, queue_name: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        match self {
            Self::RabbitMq(c) => c.consume(queue_name, consumer_tag).await,
            Self::InMemory(c) => c.consume(queue_name, consumer_tag).await,
        }
    }

    async fn close(&self) -> BrokerResult<()> {
        match self {
            Self::RabbitMq(c) => c.close().await,
            Self::InMemory(c) => c.close().await,
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Self::RabbitMq(c) => c.is_open(),
            Self::InMemory(c) => c.is_open(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_follows_backend() {
        let rabbit = BrokerProvider::from_config(&BrokerConfig::default());
        assert_eq!(rabbit.provider_name(), "rabbitmq");

        let memory = BrokerProvider::from_config(&BrokerConfig::in_memory());
        assert_eq!(memory.provider_name(), "in_memory");
    }

    #[tokio::test]
    async fn test_dispatch_reaches_in_memory_broker() {
        let broker = InMemoryBroker::new();
        let provider = BrokerProvider::InMemory(broker.clone());

        let connection = provider.open("memory://local").await.unwrap();
        let channel = connection.channel().await.unwrap();
        let queue = QueueSpec::transient("messages").unwrap();
        channel.declare_queue(&queue).await.unwrap();
        channel.publish(&Message::text(queue, "ping")).await.unwrap();

        assert_eq!(broker.ready_count("messages"), 1);
        assert!(channel.is_open());

        connection.close().await.unwrap();
        assert!(!channel.is_open());
    }
}
