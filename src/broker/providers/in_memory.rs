//! # In-Memory Broker
//!
//! Process-local broker with the same observable semantics as the RabbitMQ
//! provider, for tests and single-process demos.
//!
//! ## Semantics
//!
//! - **Durability registry**: a queue keeps the durability of its first
//!   declaration; a conflicting redeclare fails and changes nothing
//! - **At-least-once**: deliveries stay unacked until settled; nack with
//!   requeue, channel close and connection close all return them to the head
//!   of the queue flagged as redelivered
//! - **Dropped links**: dropping a connection or channel without closing it
//!   behaves like a lost TCP session and releases it the same way
//! - **Prefetch**: a channel never holds more unacked deliveries than its
//!   prefetch count (zero = unbounded)
//! - **Outages**: `set_available(false)` makes new connections and every
//!   operation fail until the broker is made available again

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::broker::errors::{BrokerError, BrokerResult};
use crate::broker::traits::{BrokerLink, LinkChannel, LinkConnection};
use crate::broker::types::{
    Acknowledger, Delivery, DeliveryStream, Message, QueueDeclared, QueueSpec,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Arc<[u8]>,
    message_id: String,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    channel_id: u64,
    message: StoredMessage,
}

#[derive(Debug)]
struct InMemoryQueue {
    durable: bool,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, Unacked>,
    consumers: u32,
    total_published: u64,
    total_acked: u64,
}

impl InMemoryQueue {
    fn new(durable: bool) -> Self {
        Self {
            durable,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            consumers: 0,
            total_published: 0,
            total_acked: 0,
        }
    }

    fn in_flight_for(&self, channel_id: u64) -> usize {
        self.unacked
            .values()
            .filter(|u| u.channel_id == channel_id)
            .count()
    }
}

#[derive(Debug)]
struct BrokerState {
    queues: Mutex<HashMap<String, InMemoryQueue>>,
    available: AtomicBool,
    next_id: AtomicU64,
    open_connections: AtomicU64,
    open_channels: AtomicU64,
    /// Woken whenever something a consumer may be waiting on changes
    activity: Notify,
}

/// Shared in-memory broker; clones talk to the same broker
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                queues: Mutex::new(HashMap::new()),
                available: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                open_connections: AtomicU64::new(0),
                open_channels: AtomicU64::new(0),
                activity: Notify::new(),
            }),
        }
    }

    /// Simulate the broker going away or coming back
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
        self.state.activity.notify_waiters();
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    /// Messages waiting for delivery (for testing)
    pub fn ready_count(&self, queue_name: &str) -> usize {
        self.state
            .queues
            .lock()
            .get(queue_name)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Messages delivered but not yet settled (for testing)
    pub fn unacked_count(&self, queue_name: &str) -> usize {
        self.state
            .queues
            .lock()
            .get(queue_name)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    /// Consumers currently registered on a queue (for testing)
    pub fn open_consumers(&self, queue_name: &str) -> u32 {
        self.state
            .queues
            .lock()
            .get(queue_name)
            .map(|q| q.consumers)
            .unwrap_or(0)
    }

    /// Durability of a declared queue (for testing)
    pub fn queue_durability(&self, queue_name: &str) -> Option<bool> {
        self.state.queues.lock().get(queue_name).map(|q| q.durable)
    }

    /// Messages ever published to a queue (for testing)
    pub fn published_count(&self, queue_name: &str) -> u64 {
        self.state
            .queues
            .lock()
            .get(queue_name)
            .map(|q| q.total_published)
            .unwrap_or(0)
    }

    /// Messages ever acknowledged on a queue (for testing)
    pub fn acked_count(&self, queue_name: &str) -> u64 {
        self.state
            .queues
            .lock()
            .get(queue_name)
            .map(|q| q.total_acked)
            .unwrap_or(0)
    }

    /// Connections opened and not yet closed or dropped (for testing)
    pub fn open_connection_count(&self) -> u64 {
        self.state.open_connections.load(Ordering::SeqCst)
    }

    /// Channels opened and not yet closed or dropped (for testing)
    pub fn open_channel_count(&self) -> u64 {
        self.state.open_channels.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> u64 {
        self.state.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_available(&self) -> BrokerResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::unavailable("in-memory broker is unreachable"))
        }
    }

    fn declare(&self, queue: &QueueSpec) -> BrokerResult<QueueDeclared> {
        let mut queues = self.state.queues.lock();
        let entry = queues
            .entry(queue.name.clone())
            .or_insert_with(|| InMemoryQueue::new(queue.durable));

        if entry.durable != queue.durable {
            return Err(BrokerError::durability_mismatch(&queue.name, queue.durable));
        }

        Ok(QueueDeclared {
            queue: queue.clone(),
            message_count: entry.ready.len() as u32,
            consumer_count: entry.consumers,
        })
    }

    fn enqueue(&self, message: &Message) -> BrokerResult<()> {
        {
            let mut queues = self.state.queues.lock();
            let queue = queues.get_mut(message.queue_name()).ok_or_else(|| {
                BrokerError::publish(message.queue_name(), "no queue declared with this name")
            })?;

            queue.ready.push_back(StoredMessage {
                payload: Arc::from(message.payload()),
                message_id: message.message_id().to_string(),
                redelivered: false,
            });
            queue.total_published += 1;
        }
        self.state.activity.notify_waiters();
        Ok(())
    }

    fn register_consumer(&self, queue_name: &str) -> BrokerResult<()> {
        let mut queues = self.state.queues.lock();
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| BrokerError::consume(queue_name, "no queue declared with this name"))?;
        queue.consumers += 1;
        Ok(())
    }

    fn take_next(&self, queue_name: &str, channel: &ChannelShared) -> Option<Delivery> {
        let mut queues = self.state.queues.lock();
        let queue = queues.get_mut(queue_name)?;

        let prefetch = channel.prefetch.load(Ordering::SeqCst) as usize;
        if prefetch > 0 && queue.in_flight_for(channel.id) >= prefetch {
            return None;
        }

        let message = queue.ready.pop_front()?;
        let delivery_tag = self.next_id();
        queue.unacked.insert(
            delivery_tag,
            Unacked {
                channel_id: channel.id,
                message: message.clone(),
            },
        );

        Some(Delivery::new(
            queue_name,
            message.payload.to_vec(),
            delivery_tag,
            message.redelivered,
            Some(message.message_id),
            Box::new(InMemoryAcker {
                broker: self.clone(),
                queue_name: queue_name.to_string(),
                delivery_tag,
            }),
        ))
    }

    fn settle(&self, queue_name: &str, delivery_tag: u64, requeue: Option<bool>) -> BrokerResult<()> {
        {
            let mut queues = self.state.queues.lock();
            let queue = queues
                .get_mut(queue_name)
                .ok_or_else(|| BrokerError::consume(queue_name, "queue no longer exists"))?;

            let unacked = queue.unacked.remove(&delivery_tag).ok_or_else(|| {
                let message = "unknown delivery tag (channel closed or already settled)";
                match requeue {
                    None => BrokerError::ack(queue_name, delivery_tag, message),
                    Some(_) => BrokerError::nack(queue_name, delivery_tag, message),
                }
            })?;

            match requeue {
                None => queue.total_acked += 1,
                Some(true) => {
                    let mut message = unacked.message;
                    message.redelivered = true;
                    queue.ready.push_front(message);
                }
                Some(false) => {}
            }
        }
        self.state.activity.notify_waiters();
        Ok(())
    }

    fn close_channel(&self, channel: &ChannelShared) {
        if channel.open.swap(false, Ordering::SeqCst) {
            self.release_channel(channel);
            self.state.open_channels.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Return every delivery held by a closing channel to its queue
    fn release_channel(&self, channel: &ChannelShared) {
        {
            let mut queues = self.state.queues.lock();
            let consuming = channel.consuming.lock();
            for (name, queue) in queues.iter_mut() {
                let mut tags: Vec<u64> = queue
                    .unacked
                    .iter()
                    .filter(|(_, u)| u.channel_id == channel.id)
                    .map(|(tag, _)| *tag)
                    .collect();
                // Highest tag first so the oldest delivery ends up at the head
                tags.sort_unstable_by(|a, b| b.cmp(a));
                for tag in tags {
                    if let Some(unacked) = queue.unacked.remove(&tag) {
                        let mut message = unacked.message;
                        message.redelivered = true;
                        queue.ready.push_front(message);
                    }
                }
                let registrations = consuming.iter().filter(|q| *q == name).count() as u32;
                queue.consumers = queue.consumers.saturating_sub(registrations);
            }
        }
        self.state.activity.notify_waiters();
    }
}

#[async_trait]
impl BrokerLink for InMemoryBroker {
    type Connection = InMemoryConnection;

    async fn open(&self, url: &str) -> BrokerResult<InMemoryConnection> {
        if !self.is_available() {
            return Err(BrokerError::connect(url, "in-memory broker is unreachable"));
        }

        let id = self.next_id();
        self.state.open_connections.fetch_add(1, Ordering::SeqCst);
        debug!(connection_id = id, "Opened in-memory broker connection");

        Ok(InMemoryConnection {
            broker: self.clone(),
            id,
            open: Arc::new(AtomicBool::new(true)),
            channels: Mutex::new(Vec::new()),
        })
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[derive(Debug)]
struct ChannelShared {
    id: u64,
    open: AtomicBool,
    prefetch: AtomicU16,
    consuming: Mutex<Vec<String>>,
}

/// Connection to an [`InMemoryBroker`]
#[derive(Debug)]
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    id: u64,
    open: Arc<AtomicBool>,
    channels: Mutex<Vec<Arc<ChannelShared>>>,
}

impl InMemoryConnection {
    /// Close every channel and mark the connection closed; false if it already was
    fn shut_down(&self) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }

        let channels: Vec<Arc<ChannelShared>> = self.channels.lock().drain(..).collect();
        for channel in channels {
            self.broker.close_channel(&channel);
        }

        self.broker.state.open_connections.fetch_sub(1, Ordering::SeqCst);
        self.broker.state.activity.notify_waiters();
        true
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if self.shut_down() {
            debug!(connection_id = self.id, "In-memory broker connection dropped without close");
        }
    }
}

#[async_trait]
impl LinkConnection for InMemoryConnection {
    type Channel = InMemoryChannel;

    async fn channel(&self) -> BrokerResult<InMemoryChannel> {
        self.broker.ensure_available()?;
        if !self.is_connected() {
            return Err(BrokerError::channel("open", "connection is closed"));
        }

        let shared = Arc::new(ChannelShared {
            id: self.broker.next_id(),
            open: AtomicBool::new(true),
            prefetch: AtomicU16::new(0),
            consuming: Mutex::new(Vec::new()),
        });
        self.channels.lock().push(shared.clone());
        self.broker.state.open_channels.fetch_add(1, Ordering::SeqCst);

        Ok(InMemoryChannel {
            broker: self.broker.clone(),
            connection_open: self.open.clone(),
            shared,
        })
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.shut_down() {
            debug!(connection_id = self.id, "Closed in-memory broker connection");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.broker.is_available()
    }
}

/// Channel on an [`InMemoryConnection`]
#[derive(Debug)]
pub struct InMemoryChannel {
    broker: InMemoryBroker,
    connection_open: Arc<AtomicBool>,
    shared: Arc<ChannelShared>,
}

impl InMemoryChannel {
    fn ensure_usable(&self, operation: &str) -> BrokerResult<()> {
        self.broker.ensure_available()?;
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::channel(operation, "channel is closed"))
        }
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        self.broker.close_channel(&self.shared);
    }
}

#[async_trait]
impl LinkChannel for InMemoryChannel {
    async fn declare_queue(&self, queue: &QueueSpec) -> BrokerResult<QueueDeclared> {
        self.ensure_usable("queue_declare")?;
        self.broker.declare(queue)
    }

    async fn publish(&self, message: &Message) -> BrokerResult<()> {
        self.ensure_usable("basic_publish")?;
        self.broker.enqueue(message)
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> BrokerResult<()> {
        self.ensure_usable("basic_qos")?;
        self.shared.prefetch.store(prefetch_count, Ordering::SeqCst);
        Ok(())
    }

    async fn consume(&self, queue_name: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        self.ensure_usable("basic_consume")?;
        self.broker.register_consumer(queue_name)?;
        self.shared.consuming.lock().push(queue_name.to_string());

        debug!(
            queue_name = %queue_name,
            consumer_tag = %consumer_tag,
            channel_id = self.shared.id,
            "Registered in-memory consumer"
        );

        let cursor = ConsumeCursor {
            broker: self.broker.clone(),
            connection_open: self.connection_open.clone(),
            channel: self.shared.clone(),
            queue_name: queue_name.to_string(),
            finished: false,
        };

        Ok(Box::pin(futures::stream::unfold(cursor, next_delivery)))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.broker.close_channel(&self.shared);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }
}

struct ConsumeCursor {
    broker: InMemoryBroker,
    connection_open: Arc<AtomicBool>,
    channel: Arc<ChannelShared>,
    queue_name: String,
    finished: bool,
}

async fn next_delivery(mut cursor: ConsumeCursor) -> Option<(BrokerResult<Delivery>, ConsumeCursor)> {
    if cursor.finished {
        return None;
    }

    let state = cursor.broker.state.clone();
    loop {
        let notified = state.activity.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let channel_open = cursor.channel.open.load(Ordering::SeqCst)
            && cursor.connection_open.load(Ordering::SeqCst);
        if !channel_open {
            return None;
        }

        if !cursor.broker.is_available() {
            cursor.finished = true;
            let err = BrokerError::consume(&cursor.queue_name, "broker connection lost");
            return Some((Err(err), cursor));
        }

        if let Some(delivery) = cursor.broker.take_next(&cursor.queue_name, &cursor.channel) {
            return Some((Ok(delivery), cursor));
        }

        notified.await;
    }
}

struct InMemoryAcker {
    broker: InMemoryBroker,
    queue_name: String,
    delivery_tag: u64,
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.broker.ensure_available()?;
        self.broker.settle(&self.queue_name, self.delivery_tag, None)
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.broker.ensure_available()?;
        self.broker
            .settle(&self.queue_name, self.delivery_tag, Some(requeue))
    }
}
