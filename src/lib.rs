#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Service Interconnect
//!
//! Three ways for independent services to talk to each other:
//!
//! - **Synchronous**: an HTTP call to a peer whose response is relayed
//! - **Asynchronous**: a fire-and-forget publish onto a broker queue, drained
//!   by a separate consumer
//! - **Hybrid**: both per request, folded into one response
//!
//! ## Module Organization
//!
//! - [`broker`] - broker links (RabbitMQ via lapin, in-memory), queue
//!   declaration, publish, consume and acknowledgement
//! - [`messaging`] - queue publisher and supervised queue consumer
//! - [`sync_caller`] - one bounded HTTP GET per call, failures as values
//! - [`hybrid`] - concurrent sync call plus publish, with the combined
//!   failure policy
//! - [`config`] - layered, validated service configuration
//! - [`web`] - axum routes for the five services
//! - [`bootstrap`] - process wiring used by the binaries
//! - [`logging`] - tracing subscriber setup
//! - [`error`] - crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use interconnect::broker::{BrokerProvider, InMemoryBroker, QueueSpec};
//! use interconnect::config::BrokerConfig;
//! use interconnect::messaging::QueuePublisher;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! let publisher = QueuePublisher::new(
//!     BrokerProvider::InMemory(broker.clone()),
//!     &BrokerConfig::in_memory(),
//! );
//!
//! let queue = QueueSpec::transient("messages")?;
//! let receipt = publisher.publish_text(&queue, "ping").await?;
//! println!("published {}", receipt.message_id);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod broker;
pub mod config;
pub mod error;
pub mod hybrid;
pub mod logging;
pub mod messaging;
pub mod sync_caller;
pub mod web;

pub use broker::{BrokerError, BrokerProvider, BrokerResult, Message, QueueSpec};
pub use config::{ServiceConfig, ServiceKind};
pub use error::{InterconnectError, Result};
pub use hybrid::{HybridFailure, HybridOrchestrator, HybridOutcome, HybridTrigger};
pub use messaging::{QueueConsumer, QueuePublisher};
pub use sync_caller::{SyncCallError, SyncCallResult, SyncCaller};
