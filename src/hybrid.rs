//! # Hybrid Orchestrator
//!
//! Runs one synchronous peer call and one queue publish per trigger and folds
//! both outcomes into a single [`HybridOutcome`].
//!
//! The two legs run concurrently and independently: neither waits for nor
//! cancels the other. A failed peer call fails the whole request whatever
//! happened to the publish. A failed publish after a successful peer call also
//! fails the request, but [`HybridFailure`] keeps the two causes apart.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::{BrokerError, BrokerResult, Message, PublishReceipt, QueueSpec};
use crate::config::{PeerConfig, ServiceConfig};
use crate::messaging::QueuePublisher;
use crate::sync_caller::{SyncCallError, SyncCallResult, SyncCaller};

/// Malformed trigger input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message must not be blank")]
    BlankMessage,

    #[error("message is {actual} bytes, the limit is {limit}")]
    MessageTooLong { actual: usize, limit: usize },
}

/// Inbound hybrid request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HybridTrigger {
    /// Text to publish; the configured default when absent
    pub message: Option<String>,
}

impl HybridTrigger {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    pub fn validate(&self, max_message_bytes: usize) -> Result<(), ValidationError> {
        let Some(message) = &self.message else {
            return Ok(());
        };
        if message.trim().is_empty() {
            return Err(ValidationError::BlankMessage);
        }
        if message.len() > max_message_bytes {
            return Err(ValidationError::MessageTooLong {
                actual: message.len(),
                limit: max_message_bytes,
            });
        }
        Ok(())
    }
}

/// What happened to the publish leg
#[derive(Debug)]
pub enum PublishStatus {
    Published(PublishReceipt),
    Failed(BrokerError),
}

impl PublishStatus {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published(_))
    }
}

impl From<BrokerResult<PublishReceipt>> for PublishStatus {
    fn from(result: BrokerResult<PublishReceipt>) -> Self {
        match result {
            Ok(receipt) => Self::Published(receipt),
            Err(e) => Self::Failed(e),
        }
    }
}

/// Which leg of a hybrid request failed
#[derive(Error, Debug)]
pub enum HybridFailure {
    #[error("synchronous call failed: {0}")]
    SyncFailed(SyncCallError),

    #[error("message publish failed: {0}")]
    PublishFailed(BrokerError),

    #[error("synchronous call failed: {sync}; message publish failed: {publish}")]
    BothFailed {
        sync: SyncCallError,
        publish: BrokerError,
    },
}

impl HybridFailure {
    /// Short text safe to hand to the caller
    pub fn outward_message(&self) -> &'static str {
        match self {
            Self::SyncFailed(_) => "Error in hybrid service: synchronous call failed",
            Self::PublishFailed(_) => "Error in hybrid service: message publish failed",
            Self::BothFailed { .. } => {
                "Error in hybrid service: synchronous call and message publish failed"
            }
        }
    }
}

/// Combined result of both legs
#[derive(Debug)]
pub struct HybridOutcome {
    pub request_id: Uuid,
    pub sync_result: SyncCallResult,
    pub publish_result: PublishStatus,
}

impl HybridOutcome {
    pub fn is_success(&self) -> bool {
        self.sync_result.is_success() && self.publish_result.is_published()
    }

    /// Apply the response policy
    pub fn into_response_text(self) -> Result<String, HybridFailure> {
        let sync = self.sync_result.into_result();
        match (sync, self.publish_result) {
            (Ok(body), PublishStatus::Published(_)) => {
                Ok(format!("Hybrid service received: {body} and sent async message"))
            }
            (Ok(_), PublishStatus::Failed(publish)) => Err(HybridFailure::PublishFailed(publish)),
            (Err(sync), PublishStatus::Published(_)) => Err(HybridFailure::SyncFailed(sync)),
            (Err(sync), PublishStatus::Failed(publish)) => {
                Err(HybridFailure::BothFailed { sync, publish })
            }
        }
    }
}

/// Composes the sync caller and the publisher for hybrid triggers
#[derive(Debug, Clone)]
pub struct HybridOrchestrator {
    caller: SyncCaller,
    publisher: Arc<QueuePublisher>,
    peer: PeerConfig,
    queue: QueueSpec,
    default_message: String,
    max_message_bytes: usize,
}

impl HybridOrchestrator {
    pub fn new(
        caller: SyncCaller,
        publisher: Arc<QueuePublisher>,
        config: &ServiceConfig,
    ) -> BrokerResult<Self> {
        Ok(Self {
            caller,
            publisher,
            peer: config.peer.clone(),
            queue: QueueSpec::new(config.queue.name.clone(), config.queue.durable)?,
            default_message: config.queue.default_message.clone(),
            max_message_bytes: config.hybrid.max_message_bytes,
        })
    }

    /// Validate the trigger, then run both legs to completion
    pub async fn handle(&self, trigger: HybridTrigger) -> Result<HybridOutcome, ValidationError> {
        trigger.validate(self.max_message_bytes)?;

        let request_id = Uuid::new_v4();
        let text = trigger.message.as_deref().unwrap_or(&self.default_message);
        let message = Message::text(self.queue.clone(), text);

        let (sync_result, publish_result) = tokio::join!(
            self.caller.call_peer(&self.peer),
            self.publisher.publish(&message),
        );
        let publish_result = PublishStatus::from(publish_result);

        let outcome = HybridOutcome {
            request_id,
            sync_result,
            publish_result,
        };

        if outcome.is_success() {
            info!(
                request_id = %request_id,
                elapsed_ms = outcome.sync_result.elapsed.as_millis() as u64,
                queue_name = %self.queue.name,
                "Hybrid request completed"
            );
        } else {
            warn!(
                request_id = %request_id,
                sync_ok = outcome.sync_result.is_success(),
                published = outcome.publish_result.is_published(),
                "Hybrid request failed"
            );
        }

        Ok(outcome)
    }
}
