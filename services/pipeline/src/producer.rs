//! Kafka producer wrapper for the Azora event bus.
//!
//! Messages are MessagePack-encoded events. Sends wait for the broker ack
//! only; no outbox or idempotency key is attached.

use crate::codec::{self, CodecError};
use crate::config::{KafkaConfig, TopicConfig};
use crate::events::Event;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors that can occur during message production
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Failed to create producer: {0}")]
    CreationError(String),

    #[error("Failed to serialize message: {0}")]
    SerializationError(#[from] CodecError),

    #[error("Failed to send message to topic {topic}: {message}")]
    SendError { topic: String, message: String },

    #[error("Producer timeout after {0:?}")]
    Timeout(Duration),
}

/// Result of a successful message delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    /// Topic the message was delivered to
    pub topic: String,
    /// Partition the message was delivered to
    pub partition: i32,
    /// Offset of the message in the partition
    pub offset: i64,
}

/// Message to be sent to the bus
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Topic to send the message to
    pub topic: String,
    /// Optional message key for partitioning
    pub key: Option<String>,
    /// Serialized message payload
    pub payload: Vec<u8>,
    /// Optional headers
    pub headers: Vec<(String, String)>,
}

impl OutgoingMessage {
    /// Encode an event for the topic it belongs to
    pub fn from_event<E: Event>(topics: &TopicConfig, event: &E) -> Result<Self, ProducerError> {
        let payload = codec::encode(event)?;
        Ok(Self {
            topic: E::topic(topics).to_string(),
            key: None,
            payload,
            headers: Vec::new(),
        }
        .with_message_type(E::NAME))
    }

    /// Add a header to the message
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Add a message type header
    pub fn with_message_type(self, msg_type: impl Into<String>) -> Self {
        self.with_header("message-type", msg_type)
    }
}

/// Kafka producer shared by every publisher in the process
pub struct EventProducer {
    producer: FutureProducer,
    default_timeout: Duration,
}

impl EventProducer {
    /// Create a new producer with the given configuration
    pub fn new(config: &KafkaConfig) -> Result<Self, ProducerError> {
        info!(
            brokers = %config.bootstrap_servers,
            "Creating Kafka producer"
        );

        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| ProducerError::CreationError(e.to_string()))?;

        Ok(Self {
            producer,
            default_timeout: config.request_timeout(),
        })
    }

    /// Send a message and wait for the broker ack
    #[instrument(skip(self, message), fields(topic = %message.topic, key = ?message.key))]
    pub async fn send(&self, message: OutgoingMessage) -> Result<DeliveryResult, ProducerError> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &message.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        let mut record = FutureRecord::to(&message.topic)
            .payload(&message.payload)
            .headers(headers);

        if let Some(ref k) = message.key {
            record = record.key(k);
        }

        debug!(size_bytes = message.payload.len(), "Sending message");

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.default_timeout))
            .await
            .map_err(|(e, _)| ProducerError::SendError {
                topic: message.topic.clone(),
                message: e.to_string(),
            })?;

        debug!(partition, offset, "Message delivered");

        Ok(DeliveryResult {
            topic: message.topic,
            partition,
            offset,
        })
    }

    /// Flush all pending messages
    pub fn flush(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|_| ProducerError::Timeout(timeout))
    }
}

impl Drop for EventProducer {
    fn drop(&mut self) {
        info!("Shutting down Kafka producer");
        if let Err(e) = self.flush(Duration::from_secs(5)) {
            warn!(error = %e, "Failed to flush producer on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PopulateUsers;

    #[test]
    fn test_outgoing_message_from_event() {
        let topics = TopicConfig::default();
        let message = OutgoingMessage::from_event(
            &topics,
            &PopulateUsers {
                user_ids: vec!["u1".to_string(), "u2".to_string()],
            },
        )
        .unwrap();

        assert_eq!(message.topic, "populate-users");
        assert_eq!(message.key, None);
        assert_eq!(
            message.headers,
            vec![("message-type".to_string(), "populate_users".to_string())]
        );

        let decoded: PopulateUsers = codec::decode(&message.payload).unwrap();
        assert_eq!(decoded.user_ids, vec!["u1", "u2"]);
    }
}
