//! # RabbitMQ Broker Link
//!
//! AMQP 0.9.1 implementation of the broker link traits using the `lapin`
//! crate.
//!
//! ## Behaviour
//!
//! - **Default exchange**: messages are published with the queue name as the
//!   routing key
//! - **Delivery mode**: persistent (2) for durable queues, transient (1)
//!   otherwise
//! - **Publisher confirms**: optional; a broker nack becomes a publish error
//! - **Timeouts**: connect is bounded by `connection_timeout_ms`, every other
//!   operation by `operation_timeout_ms`
//! - **Durability conflicts**: the broker answers a conflicting
//!   `queue.declare` with `PRECONDITION_FAILED` (406) and closes the channel;
//!   that reply is surfaced as `BrokerError::DurabilityMismatch`

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, warn};

use crate::broker::errors::{BrokerError, BrokerResult};
use crate::broker::redact_url;
use crate::broker::traits::{BrokerLink, LinkChannel, LinkConnection};
use crate::broker::types::{
    Acknowledger, Delivery, DeliveryStream, Message, QueueDeclared, QueueSpec,
};
use crate::config::BrokerConfig;

const DELIVERY_MODE_TRANSIENT: u8 = 1;
const DELIVERY_MODE_PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

#[derive(Debug, Clone)]
struct LinkSettings {
    connection_name: String,
    connection_timeout: Duration,
    operation_timeout: Duration,
    publisher_confirms: bool,
}

/// Opens lapin connections to a RabbitMQ broker
#[derive(Debug, Clone)]
pub struct RabbitMqLink {
    settings: Arc<LinkSettings>,
}

impl RabbitMqLink {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            settings: Arc::new(LinkSettings {
                connection_name: config.connection_name.clone(),
                connection_timeout: config.connection_timeout(),
                operation_timeout: config.operation_timeout(),
                publisher_confirms: config.publisher_confirms,
            }),
        }
    }
}

#[async_trait]
impl BrokerLink for RabbitMqLink {
    type Connection = RabbitMqConnection;

    async fn open(&self, url: &str) -> BrokerResult<RabbitMqConnection> {
        let redacted = redact_url(url);
        let properties = ConnectionProperties::default()
            .with_connection_name(self.settings.connection_name.clone().into());

        let connection = bounded("connect", self.settings.connection_timeout, async {
            Connection::connect(url, properties)
                .await
                .map_err(|e| BrokerError::connect(&redacted, e.to_string()))
        })
        .await?;

        debug!(broker_url = %redacted, "Opened RabbitMQ connection");

        Ok(RabbitMqConnection {
            connection,
            settings: self.settings.clone(),
            url_redacted: redacted,
        })
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}

/// A lapin connection
#[derive(Debug)]
pub struct RabbitMqConnection {
    connection: Connection,
    settings: Arc<LinkSettings>,
    url_redacted: String,
}

#[async_trait]
impl LinkConnection for RabbitMqConnection {
    type Channel = RabbitMqChannel;

    async fn channel(&self) -> BrokerResult<RabbitMqChannel> {
        let timeout = self.settings.operation_timeout;

        let channel = bounded("channel_open", timeout, async {
            self.connection
                .create_channel()
                .await
                .map_err(|e| BrokerError::channel("open", e.to_string()))
        })
        .await?;

        if self.settings.publisher_confirms {
            bounded("confirm_select", timeout, async {
                channel
                    .confirm_select(ConfirmSelectOptions::default())
                    .await
                    .map_err(|e| BrokerError::channel("confirm_select", e.to_string()))
            })
            .await?;
        }

        Ok(RabbitMqChannel {
            channel,
            settings: self.settings.clone(),
        })
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.is_connected() {
            return Ok(());
        }

        bounded("connection_close", self.settings.operation_timeout, async {
            self.connection
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| BrokerError::channel("connection_close", e.to_string()))
        })
        .await?;

        debug!(broker_url = %self.url_redacted, "Closed RabbitMQ connection");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}

/// A lapin channel
#[derive(Debug)]
pub struct RabbitMqChannel {
    channel: Channel,
    settings: Arc<LinkSettings>,
}

#[async_trait]
impl LinkChannel for RabbitMqChannel {
    async fn declare_queue(&self, queue: &QueueSpec) -> BrokerResult<QueueDeclared> {
        let declared = bounded("queue_declare", self.settings.operation_timeout, async {
            self.channel
                .queue_declare(
                    &queue.name,
                    QueueDeclareOptions {
                        durable: queue.durable,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    if is_precondition_failure(&e) {
                        BrokerError::durability_mismatch(&queue.name, queue.durable)
                    } else {
                        BrokerError::declare(&queue.name, e.to_string())
                    }
                })
        })
        .await?;

        Ok(QueueDeclared {
            queue: queue.clone(),
            message_count: declared.message_count(),
            consumer_count: declared.consumer_count(),
        })
    }

    async fn publish(&self, message: &Message) -> BrokerResult<()> {
        let queue_name = message.queue_name();
        let delivery_mode = if message.durable() {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };
        let properties = BasicProperties::default()
            .with_delivery_mode(delivery_mode)
            .with_content_type(message.content_type().into())
            .with_message_id(message.message_id().to_string().into());

        let timeout = self.settings.operation_timeout;

        let confirm = bounded("basic_publish", timeout, async {
            self.channel
                .basic_publish(
                    "",         // Default exchange
                    queue_name, // Routing key = queue name
                    BasicPublishOptions::default(),
                    message.payload(),
                    properties,
                )
                .await
                .map_err(|e| BrokerError::publish(queue_name, e.to_string()))
        })
        .await?;

        let confirmation = bounded("publish_confirm", timeout, async {
            confirm
                .await
                .map_err(|e| BrokerError::publish(queue_name, format!("confirmation failed: {e}")))
        })
        .await?;

        if confirmation.is_nack() {
            return Err(BrokerError::publish(queue_name, "broker rejected the message"));
        }

        Ok(())
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> BrokerResult<()> {
        bounded("basic_qos", self.settings.operation_timeout, async {
            self.channel
                .basic_qos(prefetch_count, BasicQosOptions::default())
                .await
                .map_err(|e| BrokerError::channel("basic_qos", e.to_string()))
        })
        .await
    }

    async fn consume(&self, queue_name: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        let consumer = bounded("basic_consume", self.settings.operation_timeout, async {
            self.channel
                .basic_consume(
                    queue_name,
                    consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::consume(queue_name, e.to_string()))
        })
        .await?;

        let queue = queue_name.to_string();
        let stream = consumer.map(move |result| match result {
            Ok(delivery) => Ok(into_delivery(&queue, delivery)),
            Err(e) => Err(BrokerError::consume(&queue, e.to_string())),
        });

        Ok(Box::pin(stream))
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.is_open() {
            return Ok(());
        }

        bounded("channel_close", self.settings.operation_timeout, async {
            self.channel
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| BrokerError::channel("close", e.to_string()))
        })
        .await
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

fn into_delivery(queue_name: &str, delivery: lapin::message::Delivery) -> Delivery {
    let message_id = delivery
        .properties
        .message_id()
        .as_ref()
        .map(|id| id.as_str().to_string());

    Delivery::new(
        queue_name,
        delivery.data,
        delivery.delivery_tag,
        delivery.redelivered,
        message_id,
        Box::new(RabbitMqAcker {
            queue_name: queue_name.to_string(),
            delivery_tag: delivery.delivery_tag,
            acker: delivery.acker,
        }),
    )
}

struct RabbitMqAcker {
    queue_name: String,
    delivery_tag: u64,
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for RabbitMqAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::ack(&self.queue_name, self.delivery_tag, e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                warn!(
                    queue_name = %self.queue_name,
                    delivery_tag = self.delivery_tag,
                    error = %e,
                    "RabbitMQ nack failed"
                );
                BrokerError::nack(&self.queue_name, self.delivery_tag, e.to_string())
            })
    }
}

/// AMQP reply code for a redeclaration with different arguments
const PRECONDITION_FAILED: u16 = 406;

/// Whether a broker reply reports a conflicting redeclaration
fn is_precondition_failure(error: &lapin::Error) -> bool {
    matches!(error, lapin::Error::ProtocolError(reply) if reply.get_id() == PRECONDITION_FAILED)
}

async fn bounded<T, F>(operation: &'static str, limit: Duration, operation_future: F) -> BrokerResult<T>
where
    F: Future<Output = BrokerResult<T>>,
{
    tokio::time::timeout(limit, operation_future)
        .await
        .map_err(|_| BrokerError::timeout(operation, limit.as_millis() as u64))?
}
