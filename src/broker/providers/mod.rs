//! Broker provider implementations

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::{InMemoryBroker, InMemoryChannel, InMemoryConnection};
pub use rabbitmq::{RabbitMqChannel, RabbitMqConnection, RabbitMqLink};
