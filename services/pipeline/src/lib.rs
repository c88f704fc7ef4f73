//! Azora Pipeline - typed event bus for the Azora video platform
//!
//! This library wraps Kafka behind a small publish/subscribe surface:
//!
//! - Wire events (`jwt-rotated`, `user-deleted`, `populate-users`,
//!   `users-populated`) encoded as MessagePack maps
//! - Subscriptions bound to a consumer group that skip undecodable messages
//! - An in-process bus with the same contract for tests and local runs
//!
//! # Example
//!
//! ```rust,no_run
//! use azora_pipeline::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = KafkaConfig::new("localhost:9092");
//!     let bus = Arc::new(KafkaEventBus::new(config.clone())?);
//!     let gateway = EventGateway::new(bus, config.topics);
//!
//!     let mut deletions = gateway.subscribe::<UserDeleted>("user-deleted-group", false).await?;
//!     gateway.publish(&PopulateUsers { user_ids: vec!["u1".into()] }).await?;
//!
//!     while let Some(event) = deletions.next().await {
//!         println!("user {} deleted", event.id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod events;
pub mod memory;
pub mod producer;

// Re-export main types
pub use bus::{EventBus, EventGateway, KafkaEventBus};
pub use codec::CodecError;
pub use config::{
    ConfigError, ConsumerConfig, KafkaConfig, ReliabilityConfig, SaslConfig, SaslMechanism,
    SecurityProtocol, SslConfig, TopicConfig,
};
pub use consumer::{
    Acknowledge, ConsumerError, EventHandler, IncomingMessage, MessageMetadata, MessageSource,
    MessageStream, Subscription,
};
pub use events::{Event, JwtRotated, PopulateUsers, Profile, User, UserDeleted, UsersPopulated};
pub use memory::InMemoryEventBus;
pub use producer::{DeliveryResult, EventProducer, OutgoingMessage, ProducerError};

/// Async trait for event handlers (re-export for convenience)
pub use async_trait::async_trait;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::{EventBus, EventGateway, KafkaEventBus};
    pub use crate::config::KafkaConfig;
    pub use crate::consumer::{ConsumerError, EventHandler, Subscription};
    pub use crate::events::{Event, JwtRotated, PopulateUsers, User, UserDeleted, UsersPopulated};
    pub use crate::producer::ProducerError;
    pub use async_trait::async_trait;
}
