//! # Broker Error Types
//!
//! Structured error handling for every broker primitive using thiserror.
//! Each variant names the stage that failed so callers can tell a connect
//! failure from a declaration conflict or a failed send.

use thiserror::Error;

/// Errors raised by broker links, publishers and consumers
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection failed: {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Channel error: {operation}: {message}")]
    Channel { operation: String, message: String },

    #[error("Queue declaration failed: {queue_name}: {message}")]
    Declare { queue_name: String, message: String },

    #[error("Durability mismatch for queue {queue_name}: already declared with durable={existing}, requested durable={requested}")]
    DurabilityMismatch {
        queue_name: String,
        existing: bool,
        requested: bool,
    },

    #[error("Publish failed: {queue_name}: {message}")]
    Publish { queue_name: String, message: String },

    #[error("Consume failed: {queue_name}: {message}")]
    Consume { queue_name: String, message: String },

    #[error("Acknowledgement failed: {queue_name}: {operation}(delivery_tag={delivery_tag}): {message}")]
    Acknowledge {
        queue_name: String,
        operation: String,
        delivery_tag: u64,
        message: String,
    },

    #[error("Broker operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Invalid queue name: {queue_name:?}: {reason}")]
    InvalidQueueName { queue_name: String, reason: String },

    #[error("Broker unavailable: {message}")]
    Unavailable { message: String },
}

impl BrokerError {
    /// Create a connection error
    pub fn connect(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a channel error
    pub fn channel(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a queue declaration error
    pub fn declare(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Declare {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a durability mismatch error
    pub fn durability_mismatch(queue_name: impl Into<String>, requested: bool) -> Self {
        Self::DurabilityMismatch {
            queue_name: queue_name.into(),
            existing: !requested,
            requested,
        }
    }

    /// Create a publish error
    pub fn publish(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a consume error
    pub fn consume(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create an ack error
    pub fn ack(queue_name: impl Into<String>, delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Acknowledge {
            queue_name: queue_name.into(),
            operation: "ack".to_string(),
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create a nack error
    pub fn nack(
        queue_name: impl Into<String>,
        delivery_tag: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::Acknowledge {
            queue_name: queue_name.into(),
            operation: "nack".to_string(),
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an invalid queue name error
    pub fn invalid_queue_name(queue_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQueueName {
            queue_name: queue_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the whole operation
    ///
    /// Declaration conflicts and invalid names are configuration bugs and
    /// never become retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Timeout { .. } | Self::Unavailable { .. }
        )
    }

    /// Whether the failure happened at the connection level
    ///
    /// Pooled connections are discarded after such errors.
    #[must_use]
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Channel { .. } | Self::Unavailable { .. }
        )
    }

    /// Short label for the failed stage, used in logs and outward messages
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Channel { .. } => "channel",
            Self::Declare { .. } | Self::DurabilityMismatch { .. } => "declare",
            Self::Publish { .. } => "publish",
            Self::Consume { .. } => "consume",
            Self::Acknowledge { .. } => "acknowledge",
            Self::Timeout { .. } => "timeout",
            Self::InvalidQueueName { .. } => "validate",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// Result alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
