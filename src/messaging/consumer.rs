//! # Queue Consumer
//!
//! Continuous receive loop over one queue.
//!
//! Startup opens a connection and channel, applies the prefetch bound and
//! declares the queue with the same durability the publishers use. Any failure
//! during startup is returned to the caller. Deliveries are then processed one
//! at a time in arrival order:
//!
//! - an empty payload is acknowledged without invoking the handler
//! - otherwise the handler runs and the delivery is acknowledged only after it
//!   succeeds; a failing handler leads to a requeueing nack
//!
//! The loop runs until the shutdown signal fires (returning the final
//! [`ConsumerStats`]) or the delivery stream fails (returning the error).

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{
    redact_url, BrokerError, BrokerLink, BrokerProvider, BrokerResult, Delivery, LinkChannel,
    LinkConnection, ProviderChannel, QueueSpec,
};
use crate::config::ServiceConfig;

use super::handler::DeliveryHandler;

/// Snapshot of consumer activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Deliveries taken off the stream
    pub received: u64,
    /// Deliveries acknowledged after successful processing
    pub acknowledged: u64,
    /// Deliveries handed back to the broker after a handler failure
    pub requeued: u64,
    /// Empty deliveries acknowledged without processing
    pub empty_payloads: u64,
    /// Acks or nacks the broker did not accept
    pub settle_failures: u64,
}

#[derive(Debug, Default)]
struct ConsumerCounters {
    received: AtomicU64,
    acknowledged: AtomicU64,
    requeued: AtomicU64,
    empty_payloads: AtomicU64,
    settle_failures: AtomicU64,
}

impl ConsumerCounters {
    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            empty_payloads: self.empty_payloads.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }
}

/// Consumes one queue and dispatches its deliveries to a handler
#[derive(Debug)]
pub struct QueueConsumer {
    provider: BrokerProvider,
    url: String,
    queue: QueueSpec,
    prefetch_count: u16,
    consumer_tag: String,
    counters: Arc<ConsumerCounters>,
}

impl QueueConsumer {
    pub fn new(
        provider: BrokerProvider,
        url: impl Into<String>,
        queue: QueueSpec,
        prefetch_count: u16,
    ) -> Self {
        Self {
            provider,
            url: url.into(),
            queue,
            prefetch_count,
            consumer_tag: format!("interconnect-{}", Uuid::new_v4()),
            counters: Arc::new(ConsumerCounters::default()),
        }
    }

    /// Consumer for the configured queue
    pub fn from_config(provider: BrokerProvider, config: &ServiceConfig) -> BrokerResult<Self> {
        let queue = QueueSpec::new(config.queue.name.clone(), config.queue.durable)?;
        Ok(Self::new(
            provider,
            config.broker.url.clone(),
            queue,
            config.broker.prefetch_count,
        ))
    }

    pub fn with_consumer_tag(mut self, consumer_tag: impl Into<String>) -> Self {
        self.consumer_tag = consumer_tag.into();
        self
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.queue
    }

    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// Run the receive loop on a background task
    pub fn spawn(self, handler: Arc<dyn DeliveryHandler>) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = self.counters.clone();
        let join = tokio::spawn(async move { self.run(handler, shutdown_rx).await });

        ConsumerHandle {
            shutdown_tx,
            join,
            counters,
        }
    }

    /// Run the receive loop until `shutdown` turns true
    pub async fn run(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> BrokerResult<ConsumerStats> {
        let connection = self.provider.open(&self.url).await?;

        let outcome = async {
            let channel = connection.channel().await?;
            let drained = self
                .drain(&channel, handler.as_ref(), &mut shutdown)
                .await;
            if let Err(e) = channel.close().await {
                warn!(queue_name = %self.queue.name, error = %e, "Failed to close consumer channel");
            }
            drained
        }
        .await;

        if let Err(e) = connection.close().await {
            warn!(
                queue_name = %self.queue.name,
                broker_url = %redact_url(&self.url),
                error = %e,
                "Failed to close consumer connection"
            );
        }

        let stats = self.stats();
        match outcome {
            Ok(()) => {
                info!(queue_name = %self.queue.name, ?stats, "Consumer stopped");
                Ok(stats)
            }
            Err(e) => {
                error!(queue_name = %self.queue.name, stage = e.stage(), error = %e, "Consumer failed");
                Err(e)
            }
        }
    }

    async fn drain(
        &self,
        channel: &ProviderChannel,
        handler: &dyn DeliveryHandler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> BrokerResult<()> {
        channel.set_prefetch(self.prefetch_count).await?;
        let declared = channel.declare_queue(&self.queue).await?;
        let mut deliveries = channel.consume(&self.queue.name, &self.consumer_tag).await?;

        info!(
            queue_name = %self.queue.name,
            durable = self.queue.durable,
            prefetch_count = self.prefetch_count,
            ready_messages = declared.message_count,
            consumer_tag = %self.consumer_tag,
            "Consumer started"
        );

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(queue_name = %self.queue.name, "Consumer received shutdown signal");
                        return Ok(());
                    }
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => self.process(delivery, handler).await,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(BrokerError::consume(&self.queue.name, "delivery stream closed by broker"));
                    }
                },
            }
        }
    }

    async fn process(&self, delivery: Delivery, handler: &dyn DeliveryHandler) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let delivery_tag = delivery.delivery_tag;

        if delivery.is_empty() {
            warn!(
                queue_name = %self.queue.name,
                delivery_tag,
                "Acknowledging empty delivery without processing"
            );
            self.counters.empty_payloads.fetch_add(1, Ordering::Relaxed);
            self.settle(delivery_tag, delivery.ack().await);
            return;
        }

        debug!(
            queue_name = %self.queue.name,
            delivery_tag,
            redelivered = delivery.redelivered,
            payload_bytes = delivery.payload.len(),
            "Processing delivery"
        );

        match Self::invoke(handler, &delivery.payload).await {
            Ok(()) => {
                if self.settle(delivery_tag, delivery.ack().await) {
                    self.counters.acknowledged.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                warn!(
                    queue_name = %self.queue.name,
                    delivery_tag,
                    error = %e,
                    "Handler failed, requeueing delivery"
                );
                if self.settle(delivery_tag, delivery.nack(true).await) {
                    self.counters.requeued.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Run the handler, turning a panic into an ordinary failure
    async fn invoke(handler: &dyn DeliveryHandler, payload: &[u8]) -> anyhow::Result<()> {
        match AssertUnwindSafe(handler.handle(payload)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )),
        }
    }

    fn settle(&self, delivery_tag: u64, result: BrokerResult<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.counters.settle_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue_name = %self.queue.name,
                    delivery_tag,
                    error = %e,
                    "Broker did not accept settlement; delivery will be redelivered"
                );
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Handle to a consumer running on a background task
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<BrokerResult<ConsumerStats>>,
    counters: Arc<ConsumerCounters>,
}

impl ConsumerHandle {
    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal shutdown and wait for the in-flight delivery to finish
    pub async fn shutdown(self) -> BrokerResult<ConsumerStats> {
        // The receiver may already be gone if the loop failed
        let _ = self.shutdown_tx.send(true);
        Self::wait(self.join).await
    }

    /// Wait for the loop to end on its own
    pub async fn join(self) -> BrokerResult<ConsumerStats> {
        let ConsumerHandle {
            shutdown_tx, join, ..
        } = self;
        let result = Self::wait(join).await;
        drop(shutdown_tx);
        result
    }

    async fn wait(join: JoinHandle<BrokerResult<ConsumerStats>>) -> BrokerResult<ConsumerStats> {
        join.await
            .map_err(|e| BrokerError::consume("<consumer task>", format!("consumer task aborted: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, Message};
    use crate::messaging::handler::{handler_fn, LoggingHandler};
    use std::time::Duration;

    async fn seed(broker: &InMemoryBroker, payloads: &[&[u8]]) {
        let connection = broker.open("memory://local").await.unwrap();
        let channel = connection.channel().await.unwrap();
        let queue = QueueSpec::transient("messages").unwrap();
        channel.declare_queue(&queue).await.unwrap();
        for payload in payloads {
            channel
                .publish(&Message::for_queue(queue.clone(), payload.to_vec()))
                .await
                .unwrap();
        }
        connection.close().await.unwrap();
    }

    fn consumer(broker: &InMemoryBroker) -> QueueConsumer {
        QueueConsumer::new(
            BrokerProvider::InMemory(broker.clone()),
            "memory://local",
            QueueSpec::transient("messages").unwrap(),
            4,
        )
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_consumer_acks_processed_deliveries() {
        let broker = InMemoryBroker::new();
        seed(&broker, &[b"one", b"two"]).await;

        let handle = consumer(&broker).spawn(Arc::new(LoggingHandler));
        wait_until(|| broker.acked_count("messages") == 2).await;

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.acknowledged, 2);
        assert_eq!(broker.ready_count("messages"), 0);
        assert_eq!(broker.unacked_count("messages"), 0);
    }

    #[tokio::test]
    async fn test_empty_payload_is_acked_without_handler() {
        let broker = InMemoryBroker::new();
        seed(&broker, &[b""]).await;

        let handler = handler_fn(|_payload| async { anyhow::bail!("handler must not run") });
        let handle = consumer(&broker).spawn(Arc::new(handler));
        wait_until(|| broker.acked_count("messages") == 1).await;

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.empty_payloads, 1);
        assert_eq!(stats.requeued, 0);
    }

    #[tokio::test]
    async fn test_failing_handler_requeues_until_success() {
        let broker = InMemoryBroker::new();
        seed(&broker, &[b"flaky"]).await;

        let attempts = Arc::new(AtomicU64::new(0));
        let seen = attempts.clone();
        let handler = handler_fn(move |_payload| {
            let seen = seen.clone();
            async move {
                let attempt = seen.fetch_add(1, Ordering::SeqCst);
                anyhow::ensure!(attempt >= 1, "first attempt fails");
                Ok(())
            }
        });

        let handle = consumer(&broker).spawn(Arc::new(handler));
        wait_until(|| broker.acked_count("messages") == 1).await;

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.acknowledged, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_requeues_and_keeps_consuming() {
        let broker = InMemoryBroker::new();
        seed(&broker, &[b"fragile"]).await;

        let attempts = Arc::new(AtomicU64::new(0));
        let seen = attempts.clone();
        let handler = handler_fn(move |_payload| {
            let seen = seen.clone();
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("handler crashed");
                }
                Ok(())
            }
        });

        let handle = consumer(&broker).spawn(Arc::new(handler));
        wait_until(|| broker.acked_count("messages") == 1).await;

        assert!(!handle.is_finished());
        let stats = handle.shutdown().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(broker.unacked_count("messages"), 0);
    }

    #[tokio::test]
    async fn test_startup_failure_is_returned() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);

        let handle = consumer(&broker).spawn(Arc::new(LoggingHandler));
        let result = handle.join().await;

        assert!(matches!(result, Err(BrokerError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_consumer_with_conflicting_durability_fails() {
        let broker = InMemoryBroker::new();
        seed(&broker, &[]).await;

        let durable = QueueConsumer::new(
            BrokerProvider::InMemory(broker.clone()),
            "memory://local",
            QueueSpec::new("messages", true).unwrap(),
            1,
        );
        let result = durable.spawn(Arc::new(LoggingHandler)).join().await;

        assert!(matches!(result, Err(BrokerError::DurabilityMismatch { .. })));
    }

    #[tokio::test]
    async fn test_broker_outage_ends_the_loop_with_error() {
        let broker = InMemoryBroker::new();
        seed(&broker, &[]).await;

        let handle = consumer(&broker).spawn(Arc::new(LoggingHandler));
        wait_until(|| broker.open_consumers("messages") == 1).await;

        broker.set_available(false);
        let result = handle.join().await;
        assert!(matches!(result, Err(BrokerError::Consume { .. })));
    }
}
