//! # Queue Messaging
//!
//! Publisher and consumer built on the broker link layer.
//!
//! - [`QueuePublisher`] declares a queue and publishes one message per call
//! - [`QueueConsumer`] drains a queue in a supervised receive loop, handing
//!   each payload to a [`DeliveryHandler`]

pub mod consumer;
pub mod handler;
pub mod publisher;

pub use consumer::{ConsumerHandle, ConsumerStats, QueueConsumer};
pub use handler::{handler_fn, DeliveryHandler, FnHandler, LoggingHandler};
pub use publisher::{PublisherStats, QueuePublisher, SharedPublisher};
