//! In-process message bus for tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::{Acker, BusConfig, BusError, Delivery, Message, MessageBus, Result, Subscription};

/// In-memory durable-queue bus.
///
/// Features:
/// - Cheap to clone; clones share the same queues
/// - One consumer per queue, messages published before a consumer exists are
///   buffered
/// - Unsettled deliveries stay in flight and are delivered again to the
///   next consumer (at-least-once)
/// - Buffered and dead-lettered messages are capped per queue; past the cap
///   the oldest message is dropped
/// - Buses built with [`InMemoryMessageBus::new`] also record every
///   published message for inspection; [`InMemoryMessageBus::connect`]
///   only keeps counters
#[derive(Clone)]
pub struct InMemoryMessageBus {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    connected: AtomicBool,
    fail_on_publish: AtomicBool,
    record_history: bool,
    max_queue_length: usize,
    queues: Mutex<HashMap<String, QueueState>>,
}

#[derive(Default)]
struct QueueState {
    consumer: Option<mpsc::UnboundedSender<Delivery>>,
    backlog: VecDeque<Message>,
    in_flight: Vec<Message>,
    history: Vec<Message>,
    published: usize,
    acked: usize,
    dead_letters: VecDeque<Message>,
}

impl QueueState {
    fn has_consumer(&self) -> bool {
        self.consumer.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Hands a message to the consumer or buffers it.
    fn dispatch(&mut self, mut message: Message, inner: &Arc<Inner>) {
        if let Some(tx) = self.consumer.as_ref().filter(|tx| !tx.is_closed()) {
            message.delivery_count += 1;
            self.in_flight.push(message.clone());
            let acker: Arc<dyn Acker> = Arc::new(QueueAcker {
                inner: inner.clone(),
            });
            if let Err(mpsc::error::SendError(delivery)) = tx.send(Delivery::new(message, acker))
            {
                let mut message = delivery.message().clone();
                self.in_flight.retain(|m| m.id != message.id);
                message.delivery_count -= 1;
                self.buffer(message, inner.max_queue_length);
            }
        } else {
            self.buffer(message, inner.max_queue_length);
        }
    }

    fn buffer(&mut self, message: Message, max_len: usize) {
        self.backlog.push_back(message);
        drop_oldest(&mut self.backlog, max_len, "backlog");
    }

    fn dead_letter(&mut self, message: Message, max_len: usize) {
        self.dead_letters.push_back(message);
        drop_oldest(&mut self.dead_letters, max_len, "dead_letters");
    }

    fn take_in_flight(&mut self, id: Uuid) -> Option<Message> {
        let position = self.in_flight.iter().position(|m| m.id == id)?;
        Some(self.in_flight.remove(position))
    }
}

/// Trims `queue` to `max_len` entries, oldest first.
fn drop_oldest(queue: &mut VecDeque<Message>, max_len: usize, buffer: &'static str) {
    while queue.len() > max_len {
        let Some(dropped) = queue.pop_front() else {
            break;
        };
        metrics::counter!("bus_messages_dropped_total", "queue" => dropped.queue.clone())
            .increment(1);
        tracing::warn!(
            queue = %dropped.queue,
            message_id = %dropped.id,
            buffer,
            max_len,
            "Queue over capacity, oldest message dropped"
        );
    }
}

impl InMemoryMessageBus {
    /// Opens a bus for the given configuration.
    pub async fn connect(config: &BusConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(BusError::Connection("bus host is not configured".to_string()));
        }

        tracing::info!(endpoint = %config.endpoint(), "Message bus connected");
        Ok(Self::open(config, false))
    }

    /// Opens a bus with the default configuration that records every
    /// published message, for tests.
    pub fn new() -> Self {
        Self::open(&BusConfig::default(), true)
    }

    fn open(config: &BusConfig, record_history: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: config.endpoint(),
                connected: AtomicBool::new(true),
                fail_on_publish: AtomicBool::new(false),
                record_history,
                max_queue_length: config.max_queue_length.max(1),
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Makes every subsequent publish fail with a connection error.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.inner.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// All messages published to `queue`, in publish order. Empty unless
    /// the bus records history.
    pub async fn published(&self, queue: &str) -> Vec<Message> {
        let queues = self.inner.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.history.clone())
            .unwrap_or_default()
    }

    pub async fn published_count(&self, queue: &str) -> usize {
        let queues = self.inner.queues.lock().await;
        queues.get(queue).map_or(0, |q| q.published)
    }

    pub async fn acked_count(&self, queue: &str) -> usize {
        let queues = self.inner.queues.lock().await;
        queues.get(queue).map_or(0, |q| q.acked)
    }

    /// Messages buffered or in flight, i.e. not yet settled.
    pub async fn pending_count(&self, queue: &str) -> usize {
        let queues = self.inner.queues.lock().await;
        queues
            .get(queue)
            .map_or(0, |q| q.backlog.len() + q.in_flight.len())
    }

    pub async fn dead_letters(&self, queue: &str) -> Vec<Message> {
        let queues = self.inner.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.dead_letters.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Closed)
        }
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    #[tracing::instrument(skip(self, message), fields(queue = %message.queue, message_id = %message.id))]
    async fn publish(&self, message: Message) -> Result<()> {
        self.ensure_connected()?;
        if self.inner.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BusError::Connection("publish rejected by broker".to_string()));
        }

        let mut queues = self.inner.queues.lock().await;
        let state = queues.entry(message.queue.clone()).or_default();
        state.published += 1;
        if self.inner.record_history {
            state.history.push(message.clone());
        }
        metrics::counter!("bus_messages_published_total", "queue" => message.queue.clone())
            .increment(1);
        state.dispatch(message, &self.inner);

        tracing::debug!("Message published");
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<Subscription> {
        self.ensure_connected()?;

        let mut queues = self.inner.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        if state.has_consumer() {
            return Err(BusError::AlreadySubscribed(queue.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.consumer = Some(tx);

        let mut pending: Vec<Message> = std::mem::take(&mut state.in_flight);
        pending.extend(state.backlog.drain(..));
        for message in pending {
            state.dispatch(message, &self.inner);
        }

        tracing::info!(queue, "Consumer subscribed");
        Ok(Subscription::new(queue, rx))
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut queues = self.inner.queues.lock().await;
        for state in queues.values_mut() {
            state.consumer = None;
        }

        tracing::info!(endpoint = %self.inner.endpoint, "Message bus closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

/// Settles deliveries against the queue they came from.
struct QueueAcker {
    inner: Arc<Inner>,
}

#[async_trait]
impl Acker for QueueAcker {
    async fn ack(&self, message: &Message) -> Result<()> {
        let mut queues = self.inner.queues.lock().await;
        if let Some(state) = queues.get_mut(&message.queue)
            && state.take_in_flight(message.id).is_some()
        {
            state.acked += 1;
        }
        Ok(())
    }

    async fn nack(&self, message: &Message, requeue: bool) -> Result<()> {
        let mut queues = self.inner.queues.lock().await;
        let Some(state) = queues.get_mut(&message.queue) else {
            return Ok(());
        };
        let Some(message) = state.take_in_flight(message.id) else {
            return Ok(());
        };

        if !requeue {
            tracing::warn!(queue = %message.queue, message_id = %message.id, "Message dead-lettered");
            state.dead_letter(message, self.inner.max_queue_length);
        } else if state.has_consumer() {
            state.dispatch(message, &self.inner);
        } else {
            state.backlog.push_front(message);
            drop_oldest(&mut state.backlog, self.inner.max_queue_length, "backlog");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(queue: &str, n: i64) -> Message {
        Message::new(queue, json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_buffers_until_subscribed() {
        let bus = InMemoryMessageBus::new();
        bus.publish(message("q", 1)).await.unwrap();
        bus.publish(message("q", 2)).await.unwrap();
        assert_eq!(bus.pending_count("q").await, 2);

        let mut subscription = bus.subscribe("q").await.unwrap();
        let first = subscription.next().await.unwrap();
        let second = subscription.next().await.unwrap();

        assert_eq!(first.message().payload["n"], 1);
        assert_eq!(second.message().payload["n"], 2);
        assert_eq!(first.message().delivery_count, 1);
    }

    #[tokio::test]
    async fn test_ack_settles() {
        let bus = InMemoryMessageBus::new();
        let mut subscription = bus.subscribe("q").await.unwrap();
        bus.publish(message("q", 1)).await.unwrap();

        subscription.next().await.unwrap().ack().await.unwrap();

        assert_eq!(bus.acked_count("q").await, 1);
        assert_eq!(bus.pending_count("q").await, 0);
        assert_eq!(bus.published_count("q").await, 1);
    }

    #[tokio::test]
    async fn test_nack_requeue_redelivers() {
        let bus = InMemoryMessageBus::new();
        let mut subscription = bus.subscribe("q").await.unwrap();
        bus.publish(message("q", 1)).await.unwrap();

        subscription.next().await.unwrap().nack(true).await.unwrap();
        let again = subscription.next().await.unwrap();

        assert_eq!(again.message().delivery_count, 2);
        assert!(again.message().is_redelivery());
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let bus = InMemoryMessageBus::new();
        let mut subscription = bus.subscribe("q").await.unwrap();
        bus.publish(message("q", 1)).await.unwrap();

        subscription.next().await.unwrap().nack(false).await.unwrap();

        assert_eq!(bus.dead_letters("q").await.len(), 1);
        assert_eq!(bus.pending_count("q").await, 0);
    }

    #[tokio::test]
    async fn test_one_consumer_per_queue() {
        let bus = InMemoryMessageBus::new();
        let _subscription = bus.subscribe("q").await.unwrap();

        let result = bus.subscribe("q").await;
        assert!(matches!(result, Err(BusError::AlreadySubscribed(_))));
        assert!(bus.subscribe("other").await.is_ok());
    }

    #[tokio::test]
    async fn test_unsettled_redelivered_to_next_consumer() {
        let bus = InMemoryMessageBus::new();
        let mut subscription = bus.subscribe("q").await.unwrap();
        bus.publish(message("q", 1)).await.unwrap();

        let delivery = subscription.next().await.unwrap();
        drop(delivery);
        drop(subscription);

        let mut next = bus.subscribe("q").await.unwrap();
        let redelivered = next.next().await.unwrap();
        assert_eq!(redelivered.message().payload["n"], 1);
        assert_eq!(redelivered.message().delivery_count, 2);
    }

    #[tokio::test]
    async fn test_closed_bus_rejects_work() {
        let bus = InMemoryMessageBus::new();
        let mut subscription = bus.subscribe("q").await.unwrap();

        bus.close().await.unwrap();

        assert!(!bus.is_connected());
        assert!(subscription.next().await.is_none());
        assert!(matches!(
            bus.publish(message("q", 1)).await,
            Err(BusError::Closed)
        ));
        assert!(matches!(bus.subscribe("q").await, Err(BusError::Closed)));
        bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_on_publish() {
        let bus = InMemoryMessageBus::new();
        bus.set_fail_on_publish(true);

        let result = bus.publish(message("q", 1)).await;
        assert!(matches!(result, Err(BusError::Connection(_))));
        assert_eq!(bus.published_count("q").await, 0);
    }

    #[tokio::test]
    async fn test_backlog_drops_oldest_past_capacity() {
        let config = BusConfig {
            max_queue_length: 2,
            ..BusConfig::default()
        };
        let bus = InMemoryMessageBus::connect(&config).await.unwrap();
        for n in 1..=3 {
            bus.publish(message("q", n)).await.unwrap();
        }

        assert_eq!(bus.pending_count("q").await, 2);
        let mut subscription = bus.subscribe("q").await.unwrap();
        let first = subscription.next().await.unwrap();
        assert_eq!(first.message().payload["n"], 2);
    }

    #[tokio::test]
    async fn test_dead_letters_capped() {
        let config = BusConfig {
            max_queue_length: 1,
            ..BusConfig::default()
        };
        let bus = InMemoryMessageBus::connect(&config).await.unwrap();
        let mut subscription = bus.subscribe("q").await.unwrap();
        for n in 1..=2 {
            bus.publish(message("q", n)).await.unwrap();
            subscription.next().await.unwrap().nack(false).await.unwrap();
        }

        let dead = bus.dead_letters("q").await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload["n"], 2);
    }

    #[tokio::test]
    async fn test_connected_bus_counts_without_history() {
        let bus = InMemoryMessageBus::connect(&BusConfig::default())
            .await
            .unwrap();
        let mut subscription = bus.subscribe("q").await.unwrap();
        bus.publish(message("q", 1)).await.unwrap();
        subscription.next().await.unwrap().ack().await.unwrap();

        assert_eq!(bus.published_count("q").await, 1);
        assert_eq!(bus.acked_count("q").await, 1);
        assert!(bus.published("q").await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_requires_host() {
        let config = BusConfig {
            host: " ".to_string(),
            ..BusConfig::default()
        };
        assert!(matches!(
            InMemoryMessageBus::connect(&config).await,
            Err(BusError::Connection(_))
        ));
    }
}
