//! Event bus abstraction and the typed gateway on top of it.
//!
//! [`EventBus`] moves raw payloads between topics; [`EventGateway`] adds the
//! typed layer: topic resolution, MessagePack encoding and decoding.

use crate::config::{KafkaConfig, TopicConfig};
use crate::consumer::{self, ConsumerError, MessageSource, Subscription};
use crate::events::Event;
use crate::producer::{DeliveryResult, EventProducer, OutgoingMessage, ProducerError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Transport for raw event payloads.
///
/// Delivery is at-least-once and ordered per partition. A subscription bound
/// to a shared group splits the topic with other members of that group; a
/// unique group sees every message.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message and wait for the transport's ack
    async fn publish(&self, message: OutgoingMessage) -> Result<DeliveryResult, ProducerError>;

    /// Open a subscription on `topic` as a member of `group_id`
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        from_beginning: bool,
    ) -> Result<MessageSource, ConsumerError>;
}

/// Kafka-backed event bus.
///
/// One producer is shared by all publishers; each subscription owns its own
/// consumer so that it can join its own group.
pub struct KafkaEventBus {
    config: KafkaConfig,
    producer: EventProducer,
}

impl KafkaEventBus {
    pub fn new(config: KafkaConfig) -> Result<Self, ProducerError> {
        let producer = EventProducer::new(&config)?;
        Ok(Self { config, producer })
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, message: OutgoingMessage) -> Result<DeliveryResult, ProducerError> {
        self.producer.send(message).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        from_beginning: bool,
    ) -> Result<MessageSource, ConsumerError> {
        consumer::kafka_source(&self.config, topic, group_id, from_beginning)
    }
}

/// Typed publish/subscribe over an [`EventBus`]
#[derive(Clone)]
pub struct EventGateway {
    bus: Arc<dyn EventBus>,
    topics: TopicConfig,
}

impl EventGateway {
    pub fn new(bus: Arc<dyn EventBus>, topics: TopicConfig) -> Self {
        Self { bus, topics }
    }

    /// Encode and publish an event on its topic
    #[instrument(skip(self, event), fields(event = E::NAME))]
    pub async fn publish<E: Event>(&self, event: &E) -> Result<DeliveryResult, ProducerError> {
        let message = OutgoingMessage::from_event(&self.topics, event)?;
        let result = self.bus.publish(message).await?;

        debug!(
            topic = %result.topic,
            partition = result.partition,
            offset = result.offset,
            "Event published"
        );
        metrics::counter!("pipeline.messages.published").increment(1);

        Ok(result)
    }

    /// Subscribe to the topic of `E` as a member of `group_id`
    pub async fn subscribe<E: Event>(
        &self,
        group_id: &str,
        from_beginning: bool,
    ) -> Result<Subscription<E>, ConsumerError> {
        let topic = E::topic(&self.topics).to_string();
        let source = self.bus.subscribe(&topic, group_id, from_beginning).await?;
        Ok(Subscription::new(topic, group_id.to_string(), source))
    }
}
