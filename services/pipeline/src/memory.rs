//! In-process event bus.
//!
//! Keeps the most recent messages per topic and fans every message out to all
//! live subscribers. Consumer groups are not load-balanced: every subscriber
//! sees every message, and `from_beginning` replays the retained history
//! first. Consumer positions are not tracked. Used by tests and by
//! single-process local runs without a broker.

use crate::bus::EventBus;
use crate::consumer::{ConsumerError, IncomingMessage, MessageMetadata, MessageSource};
use crate::producer::{DeliveryResult, OutgoingMessage, ProducerError};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const CHANNEL_CAPACITY: usize = 1024;

/// Messages kept per topic by [`InMemoryEventBus::new`]
pub const DEFAULT_RETENTION: usize = 1024;

struct TopicLog {
    history: VecDeque<IncomingMessage>,
    next_offset: i64,
    live: broadcast::Sender<IncomingMessage>,
}

impl TopicLog {
    fn new() -> Self {
        let (live, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: VecDeque::new(),
            next_offset: 0,
            live,
        }
    }
}

pub struct InMemoryEventBus {
    topics: Mutex<HashMap<String, TopicLog>>,
    retention: usize,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Bus that keeps at most `retention` messages per topic
    pub fn with_retention(retention: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Retained raw payloads published on `topic`, oldest first
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.topics
            .lock()
            .get(topic)
            .map(|log| log.history.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, message: OutgoingMessage) -> Result<DeliveryResult, ProducerError> {
        let mut topics = self.topics.lock();
        let log = topics
            .entry(message.topic.clone())
            .or_insert_with(TopicLog::new);

        let offset = log.next_offset;
        log.next_offset += 1;
        let incoming = IncomingMessage {
            payload: message.payload,
            metadata: MessageMetadata {
                topic: message.topic.clone(),
                partition: 0,
                offset,
                key: message.key.map(String::into_bytes),
                timestamp: None,
                headers: message.headers.into_iter().collect(),
            },
        };

        if self.retention > 0 {
            if log.history.len() == self.retention {
                log.history.pop_front();
            }
            log.history.push_back(incoming.clone());
        }
        // Sending with no live subscribers is not an error here
        let _ = log.live.send(incoming);

        Ok(DeliveryResult {
            topic: message.topic,
            partition: 0,
            offset,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        _group_id: &str,
        from_beginning: bool,
    ) -> Result<MessageSource, ConsumerError> {
        let (replay, rx) = {
            let mut topics = self.topics.lock();
            let log = topics.entry(topic.to_string()).or_insert_with(TopicLog::new);
            let replay: Vec<IncomingMessage> = if from_beginning {
                log.history.iter().cloned().collect()
            } else {
                Vec::new()
            };
            (replay, log.live.subscribe())
        };

        let live = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(message) => Some((Ok(message), rx)),
                Err(RecvError::Lagged(skipped)) => Some((Err(ConsumerError::Lagged(skipped)), rx)),
                Err(RecvError::Closed) => None,
            }
        });

        Ok(MessageSource::unacknowledged(
            futures::stream::iter(replay.into_iter().map(Ok))
                .chain(live)
                .boxed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, payload: &[u8]) -> OutgoingMessage {
        OutgoingMessage {
            topic: topic.to_string(),
            key: None,
            payload: payload.to_vec(),
            headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_live_subscriber_skips_history() {
        let bus = InMemoryEventBus::new();
        bus.publish(message("t", b"old")).await.unwrap();

        let mut stream = bus.subscribe("t", "g", false).await.unwrap().messages;
        bus.publish(message("t", b"new")).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.payload, b"new");
        assert_eq!(received.metadata.offset, 1);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_each_message() {
        let bus = InMemoryEventBus::new();
        let mut a = bus.subscribe("t", "same-group", false).await.unwrap().messages;
        let mut b = bus.subscribe("t", "same-group", false).await.unwrap().messages;

        bus.publish(message("t", b"x")).await.unwrap();

        assert_eq!(a.next().await.unwrap().unwrap().payload, b"x");
        assert_eq!(b.next().await.unwrap().unwrap().payload, b"x");
        assert_eq!(bus.published("t"), vec![b"x".to_vec()]);
        assert!(bus.published("other").is_empty());
    }

    #[tokio::test]
    async fn test_history_keeps_only_latest_messages() {
        let bus = InMemoryEventBus::with_retention(2);
        for payload in [b"a", b"b", b"c"] {
            bus.publish(message("t", payload)).await.unwrap();
        }
        assert_eq!(bus.published("t"), vec![b"b".to_vec(), b"c".to_vec()]);

        let mut replay = bus.subscribe("t", "g", true).await.unwrap().messages;
        let first = replay.next().await.unwrap().unwrap();
        assert_eq!(first.payload, b"b");
        assert_eq!(first.metadata.offset, 1);

        let ack = bus.publish(message("t", b"d")).await.unwrap();
        assert_eq!(ack.offset, 3);
    }
}
