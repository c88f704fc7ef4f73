//! Consumer side of the Azora event bus.
//!
//! A subscription is an unbounded, non-restartable stream of decoded events.
//! Broker errors and undecodable messages are logged and skipped so that one
//! bad message never ends a subscription.
//!
//! Kafka offsets are stored only after a message has been handled, and the
//! group's auto-commit only ever commits stored offsets. Messages still
//! buffered when a subscription stops are redelivered to the next member.

use crate::codec;
use crate::config::KafkaConfig;
use crate::events::Event;
use futures::stream::BoxStream;
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message as KafkaMessage};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that can occur during message consumption
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Failed to create consumer: {0}")]
    CreationError(String),

    #[error("Failed to subscribe to topic {topic}: {message}")]
    SubscriptionError { topic: String, message: String },

    #[error("Consumer poll error: {0}")]
    PollError(String),

    #[error("Subscriber lagged behind, {0} messages dropped")]
    Lagged(u64),

    #[error("Message processing error: {0}")]
    ProcessingError(String),
}

/// Metadata about a received message
#[derive(Debug, Clone, Default)]
pub struct MessageMetadata {
    /// Topic the message was received from
    pub topic: String,
    /// Partition the message was received from
    pub partition: i32,
    /// Offset of the message in the partition
    pub offset: i64,
    /// Message key (if present)
    pub key: Option<Vec<u8>>,
    /// Timestamp of the message
    pub timestamp: Option<i64>,
    /// Message headers
    pub headers: HashMap<String, String>,
}

/// A received message with payload and metadata
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Raw message payload
    pub payload: Vec<u8>,
    /// Message metadata
    pub metadata: MessageMetadata,
}

impl IncomingMessage {
    /// Convert a borrowed Kafka message
    fn from_kafka<M: KafkaMessage>(msg: &M) -> Self {
        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for header in h.iter() {
                if let Some(value) = header.value {
                    if let Ok(v) = String::from_utf8(value.to_vec()) {
                        headers.insert(header.key.to_string(), v);
                    }
                }
            }
        }

        Self {
            payload: msg.payload().unwrap_or(&[]).to_vec(),
            metadata: MessageMetadata {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
                key: msg.key().map(|k| k.to_vec()),
                timestamp: msg.timestamp().to_millis(),
                headers,
            },
        }
    }
}

/// Raw message stream produced by an [`EventBus`](crate::bus::EventBus)
pub type MessageStream = BoxStream<'static, Result<IncomingMessage, ConsumerError>>;

/// Marks a message as handled so its group may move past it
pub trait Acknowledge: Send + Sync {
    fn ack(&self, metadata: &MessageMetadata);
}

/// Raw messages of one subscription and the handle that acknowledges them
pub struct MessageSource {
    pub messages: MessageStream,
    pub acker: Arc<dyn Acknowledge>,
}

impl MessageSource {
    pub fn new(messages: MessageStream, acker: Arc<dyn Acknowledge>) -> Self {
        Self { messages, acker }
    }

    /// Source for transports without consumer positions
    pub fn unacknowledged(messages: MessageStream) -> Self {
        Self::new(messages, Arc::new(NoPositions))
    }
}

struct NoPositions;

impl Acknowledge for NoPositions {
    fn ack(&self, _metadata: &MessageMetadata) {}
}

/// Stores handled offsets for the next auto-commit
struct KafkaOffsets {
    consumer: Arc<StreamConsumer>,
}

impl Acknowledge for KafkaOffsets {
    fn ack(&self, metadata: &MessageMetadata) {
        // librdkafka stores offset + 1, the position to resume from
        let stored = self
            .consumer
            .store_offset(&metadata.topic, metadata.partition, metadata.offset);
        if let Err(e) = stored {
            warn!(
                topic = %metadata.topic,
                partition = metadata.partition,
                offset = metadata.offset,
                error = %e,
                "Failed to store consumer offset"
            );
            metrics::counter!("pipeline.consumer.offset_errors").increment(1);
        }
    }
}

/// Open a Kafka consumer in `group_id` and stream its messages.
///
/// The consumer is owned by a background task that forwards messages into a
/// bounded channel. Dropping the source stops the task and closes the
/// consumer, which commits the offsets acknowledged so far.
pub(crate) fn kafka_source(
    config: &KafkaConfig,
    topic: &str,
    group_id: &str,
    from_beginning: bool,
) -> Result<MessageSource, ConsumerError> {
    let consumer: StreamConsumer = config
        .build_consumer_config(group_id, from_beginning)
        .create()
        .map_err(|e| ConsumerError::CreationError(e.to_string()))?;

    consumer
        .subscribe(&[topic])
        .map_err(|e| ConsumerError::SubscriptionError {
            topic: topic.to_string(),
            message: e.to_string(),
        })?;

    info!(topic, group = group_id, from_beginning, "Subscribed to Kafka topic");

    let consumer = Arc::new(consumer);
    let (tx, rx) = mpsc::channel(config.consumer.buffer_size);

    let task_consumer = Arc::clone(&consumer);
    tokio::spawn(async move {
        let mut stream = task_consumer.stream();
        loop {
            let item = tokio::select! {
                _ = tx.closed() => break,
                next = stream.next() => match next {
                    Some(result) => result
                        .map(|message| IncomingMessage::from_kafka(&message))
                        .map_err(|e| ConsumerError::PollError(e.to_string())),
                    None => break,
                },
            };

            if tx.send(item).await.is_err() {
                break;
            }
        }
        debug!("Consumer task stopped");
    });

    let messages = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();

    Ok(MessageSource::new(messages, Arc::new(KafkaOffsets { consumer })))
}

/// A stream of decoded events of one type
pub struct Subscription<E> {
    topic: String,
    group_id: String,
    source: MessageSource,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event> Subscription<E> {
    pub(crate) fn new(topic: String, group_id: String, source: MessageSource) -> Self {
        Self {
            topic,
            group_id,
            source,
            _event: PhantomData,
        }
    }

    /// Topic this subscription reads
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next decodable event.
    ///
    /// The event is acknowledged as soon as it is returned; [`run`](Self::run)
    /// acknowledges only once the handler is done with it. Returns `None`
    /// only when the underlying stream has ended.
    pub async fn next(&mut self) -> Option<E> {
        let (event, metadata) = self.next_message().await?;
        self.source.acker.ack(&metadata);
        Some(event)
    }

    async fn next_message(&mut self) -> Option<(E, MessageMetadata)> {
        loop {
            match self.source.messages.next().await? {
                Ok(message) => match codec::decode::<E>(&message.payload) {
                    Ok(event) => {
                        metrics::counter!("pipeline.messages.received").increment(1);
                        return Some((event, message.metadata));
                    }
                    Err(e) => {
                        warn!(
                            topic = %message.metadata.topic,
                            partition = message.metadata.partition,
                            offset = message.metadata.offset,
                            event = E::NAME,
                            error = %e,
                            "Skipping undecodable message"
                        );
                        metrics::counter!("pipeline.messages.undecodable").increment(1);
                        self.source.acker.ack(&message.metadata);
                    }
                },
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "Consumer error");
                    metrics::counter!("pipeline.consumer.errors").increment(1);
                }
            }
        }
    }

    /// Feed every event to `handler` until the stream ends or `shutdown` fires.
    ///
    /// Each event is acknowledged after its handler returns, failed or not.
    /// Events still buffered at shutdown stay unacknowledged.
    pub async fn run<H>(mut self, handler: Arc<H>, shutdown: CancellationToken)
    where
        H: EventHandler<E> + ?Sized,
    {
        info!(topic = %self.topic, group = %self.group_id, "Starting event listener");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(topic = %self.topic, "Listener received shutdown signal");
                    break;
                }
                next = self.next_message() => {
                    let Some((event, metadata)) = next else {
                        debug!(topic = %self.topic, "Stream ended");
                        break;
                    };

                    if let Err(e) = handler.handle(event).await {
                        handler.on_error(&self.topic, e).await;
                        metrics::counter!("pipeline.messages.failed").increment(1);
                    } else {
                        metrics::counter!("pipeline.messages.processed").increment(1);
                    }
                    self.source.acker.ack(&metadata);
                }
            }
        }
    }
}

/// Handler trait for processing decoded events
#[async_trait::async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    /// Process a single event
    async fn handle(&self, event: E) -> Result<(), ConsumerError>;

    /// Called when event processing fails
    async fn on_error(&self, topic: &str, error: ConsumerError) {
        warn!(topic, event = E::NAME, error = %error, "Event processing failed");
    }
}
