//! # Broker Types
//!
//! Messages, queue declarations and deliveries shared by every provider.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{BrokerError, BrokerResult};

/// Longest queue name AMQP 0.9.1 accepts (short string)
pub const MAX_QUEUE_NAME_BYTES: usize = 255;

/// Content type used for raw text payloads
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// Content type used for serde-encoded payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A queue name together with its durability
///
/// Durability is fixed per queue; every publisher and consumer of the same
/// queue must use the same `QueueSpec`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
}

impl QueueSpec {
    /// Create a validated queue spec
    pub fn new(name: impl Into<String>, durable: bool) -> BrokerResult<Self> {
        let name = name.into();
        validate_queue_name(&name)?;
        Ok(Self { name, durable })
    }

    /// Non-durable queue, as used by the lab services
    pub fn transient(name: impl Into<String>) -> BrokerResult<Self> {
        Self::new(name, false)
    }
}

impl fmt::Display for QueueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (durable={})", self.name, self.durable)
    }
}

/// Reject names the broker would refuse or treat specially
pub fn validate_queue_name(name: &str) -> BrokerResult<()> {
    if name.trim().is_empty() {
        return Err(BrokerError::invalid_queue_name(name, "queue name is empty"));
    }
    if name.len() > MAX_QUEUE_NAME_BYTES {
        return Err(BrokerError::invalid_queue_name(
            name,
            format!("queue name exceeds {MAX_QUEUE_NAME_BYTES} bytes"),
        ));
    }
    if name.starts_with("amq.") {
        return Err(BrokerError::invalid_queue_name(
            name,
            "the amq. prefix is reserved by the broker",
        ));
    }
    Ok(())
}

/// One message bound for a queue
///
/// The payload is shared and immutable once constructed; there is no way to
/// mutate it through this type.
#[derive(Debug, Clone)]
pub struct Message {
    queue: QueueSpec,
    payload: Arc<[u8]>,
    message_id: Uuid,
    content_type: &'static str,
    created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message carrying raw bytes
    pub fn new(
        queue_name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        durable: bool,
    ) -> BrokerResult<Self> {
        Ok(Self::for_queue(
            QueueSpec::new(queue_name, durable)?,
            payload,
        ))
    }

    /// Create a message for an already validated queue spec
    pub fn for_queue(queue: QueueSpec, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            queue,
            payload: Arc::from(payload.into()),
            message_id: Uuid::new_v4(),
            content_type: TEXT_CONTENT_TYPE,
            created_at: Utc::now(),
        }
    }

    /// Create a message with a UTF-8 text payload
    pub fn text(queue: QueueSpec, text: &str) -> Self {
        Self::for_queue(queue, text.as_bytes().to_vec())
    }

    /// Create a message from a serde-encoded envelope
    pub fn encode<T: QueueMessage>(queue: QueueSpec, envelope: &T) -> BrokerResult<Self> {
        let mut message = Self::for_queue(queue, envelope.to_payload()?);
        message.content_type = JSON_CONTENT_TYPE;
        Ok(message)
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.queue
    }

    pub fn queue_name(&self) -> &str {
        &self.queue.name
    }

    pub fn durable(&self) -> bool {
        self.queue.durable
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Lossy text view of the payload, for logging
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Result of a successful queue declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclared {
    pub queue: QueueSpec,
    /// Messages ready for delivery at declaration time
    pub message_count: u32,
    /// Consumers attached at declaration time
    pub consumer_count: u32,
}

/// Proof that a message was handed to the broker
#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub queue_name: String,
    pub message_id: Uuid,
    pub payload_bytes: usize,
    pub durable: bool,
    pub published_at: DateTime<Utc>,
}

impl PublishReceipt {
    pub fn for_message(message: &Message) -> Self {
        Self {
            queue_name: message.queue_name().to_string(),
            message_id: message.message_id(),
            payload_bytes: message.payload().len(),
            durable: message.durable(),
            published_at: Utc::now(),
        }
    }
}

/// Settles a delivery with the broker that produced it
#[async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    /// Confirm processing; the broker drops the message
    async fn ack(&self) -> BrokerResult<()>;

    /// Reject the delivery; with `requeue` the broker delivers it again
    async fn nack(&self, requeue: bool) -> BrokerResult<()>;
}

/// A message handed to a consumer, pending acknowledgement
pub struct Delivery {
    pub queue_name: String,
    pub payload: Vec<u8>,
    pub delivery_tag: u64,
    /// Set when the broker delivered this message before without an ack
    pub redelivered: bool,
    pub message_id: Option<String>,
    acker: Box<dyn Acknowledger>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("queue_name", &self.queue_name)
            .field("payload_bytes", &self.payload.len())
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("message_id", &self.message_id)
            .finish()
    }
}

impl Delivery {
    pub fn new(
        queue_name: impl Into<String>,
        payload: Vec<u8>,
        delivery_tag: u64,
        redelivered: bool,
        message_id: Option<String>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            payload,
            delivery_tag,
            redelivered,
            message_id,
            acker,
        }
    }

    /// Empty bodies carry nothing to process
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Decode a serde envelope from the payload
    pub fn decode<T: QueueMessage>(&self) -> BrokerResult<T> {
        T::from_payload(&self.payload)
    }

    /// Acknowledge this delivery
    pub async fn ack(self) -> BrokerResult<()> {
        self.acker.ack().await
    }

    /// Negatively acknowledge this delivery
    pub async fn nack(self, requeue: bool) -> BrokerResult<()> {
        self.acker.nack(requeue).await
    }
}

/// Stream of deliveries produced by a consume registration
pub type DeliveryStream = Pin<Box<dyn Stream<Item = BrokerResult<Delivery>> + Send>>;

/// Message serialization contract
///
/// Any serde type can travel through a queue as JSON via the blanket impl.
pub trait QueueMessage: Send + Sync + Sized + 'static {
    fn to_payload(&self) -> BrokerResult<Vec<u8>>;

    fn from_payload(bytes: &[u8]) -> BrokerResult<Self>;
}

impl<T> QueueMessage for T
where
    T: Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    fn to_payload(&self) -> BrokerResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| BrokerError::publish("<encode>", format!("serialization failed: {e}")))
    }

    fn from_payload(bytes: &[u8]) -> BrokerResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BrokerError::consume("<decode>", format!("deserialization failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        from: String,
        sequence: u32,
    }

    #[test]
    fn test_queue_name_validation() {
        assert!(QueueSpec::transient("messages").is_ok());
        assert!(matches!(
            QueueSpec::transient("   "),
            Err(BrokerError::InvalidQueueName { .. })
        ));
        assert!(matches!(
            QueueSpec::transient("amq.gen-123"),
            Err(BrokerError::InvalidQueueName { .. })
        ));
        assert!(QueueSpec::transient("x".repeat(MAX_QUEUE_NAME_BYTES)).is_ok());
        assert!(QueueSpec::transient("x".repeat(MAX_QUEUE_NAME_BYTES + 1)).is_err());
    }

    #[test]
    fn test_message_carries_queue_durability() {
        let message = Message::new("orders", b"ping".to_vec(), true).unwrap();
        assert_eq!(message.queue_name(), "orders");
        assert!(message.durable());
        assert_eq!(message.payload(), b"ping");
        assert_eq!(message.content_type(), TEXT_CONTENT_TYPE);
    }

    #[test]
    fn test_cloned_messages_share_payload() {
        let message = Message::text(QueueSpec::transient("messages").unwrap(), "hello");
        let copy = message.clone();
        assert_eq!(copy.message_id(), message.message_id());
        assert!(std::ptr::eq(copy.payload(), message.payload()));
    }

    #[test]
    fn test_encoded_envelope_is_json() {
        let greeting = Greeting {
            from: "service-c".to_string(),
            sequence: 7,
        };
        let message =
            Message::encode(QueueSpec::transient("messages").unwrap(), &greeting).unwrap();
        assert_eq!(message.content_type(), JSON_CONTENT_TYPE);
        assert_eq!(Greeting::from_payload(message.payload()).unwrap(), greeting);
    }

    #[test]
    fn test_decoding_garbage_fails() {
        assert!(Greeting::from_payload(b"not json").is_err());
    }
}
