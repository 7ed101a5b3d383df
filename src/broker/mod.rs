//! # Broker Link Layer
//!
//! Provider-agnostic access to a message broker: connections, channels, queue
//! declaration, publish, consume and acknowledgement.
//!
//! ## Architecture
//!
//! ```text
//! BrokerProvider (enum)          <- selected from BrokerConfig
//!   ├── RabbitMq(RabbitMqLink)   <- AMQP 0.9.1 via lapin
//!   └── InMemory(InMemoryBroker) <- process-local, same semantics
//!
//! BrokerLink::open -> LinkConnection::channel -> LinkChannel
//!                                                  ├── declare_queue
//!                                                  ├── publish
//!                                                  ├── set_prefetch
//!                                                  └── consume -> DeliveryStream
//!                                                                  └── Delivery::ack / nack
//! ```
//!
//! ## Design Decisions
//!
//! - **Enum dispatch** for providers, traits with associated types at the seam
//! - **Durability is part of the queue identity**: a conflicting redeclare is
//!   `BrokerError::DurabilityMismatch`, never a silent change
//! - **Every network primitive is bounded** by a configured timeout

pub mod errors;
pub mod pool;
mod provider;
pub mod providers;
mod traits;
pub mod types;

pub use errors::{BrokerError, BrokerResult};
pub use pool::{ConnectionPool, ConnectionStrategy, PoolStats};
pub use provider::{BrokerProvider, ProviderChannel, ProviderConnection};
pub use providers::InMemoryBroker;
pub use traits::{BrokerLink, LinkChannel, LinkConnection};
pub use types::{
    Acknowledger, Delivery, DeliveryStream, Message, PublishReceipt, QueueDeclared, QueueMessage,
    QueueSpec,
};

/// Hide credentials in a broker URL before it reaches a log line
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return if url.contains('@') {
            "***".to_string()
        } else {
            url.to_string()
        };
    };

    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}
