//! Owner enrichment: attaching user profiles to videos.

pub mod breaker;
pub mod engine;

pub use breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
pub use engine::EnrichmentEngine;

use crate::cache::CacheError;
use crate::models::{PopulatedVideo, Video};
use async_trait::async_trait;
use azora_pipeline::{EventGateway, PopulateUsers, ProducerError};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("Owner enrichment unavailable")]
    Unavailable,

    #[error("Owner enrichment timed out after {0:?}")]
    TimedOut(Duration),

    #[error("User cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Failed to request user population: {0}")]
    Publish(#[from] ProducerError),

    #[error("Owner {0} missing after resolution")]
    MissingOwner(String),
}

/// Produces one [`PopulatedVideo`] per input video, in input order
#[async_trait]
pub trait Enrich: Send + Sync {
    async fn enrich(&self, videos: &[Video]) -> Result<Vec<PopulatedVideo>, EnrichmentError>;
}

/// Asks the user service to materialize users into the cache
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PopulationRequester: Send + Sync {
    async fn request(&self, user_ids: Vec<String>) -> Result<(), ProducerError>;
}

/// Publishes `populate-users` events on the bus
pub struct BusPopulationRequester {
    gateway: EventGateway,
}

impl BusPopulationRequester {
    pub fn new(gateway: EventGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl PopulationRequester for BusPopulationRequester {
    #[instrument(skip(self), fields(count = user_ids.len()))]
    async fn request(&self, user_ids: Vec<String>) -> Result<(), ProducerError> {
        self.gateway.publish(&PopulateUsers { user_ids }).await?;
        Ok(())
    }
}

/// An [`Enrich`] implementation run through a [`CircuitBreaker`]
pub struct Guarded<E> {
    inner: E,
    breaker: CircuitBreaker,
}

impl<E: Enrich> Guarded<E> {
    pub fn new(inner: E, config: BreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }
}

#[async_trait]
impl<E: Enrich> Enrich for Guarded<E> {
    async fn enrich(&self, videos: &[Video]) -> Result<Vec<PopulatedVideo>, EnrichmentError> {
        self.breaker
            .call(|| self.inner.enrich(videos))
            .await
            .map_err(|e| match e {
                BreakerError::Open => EnrichmentError::Unavailable,
                BreakerError::Timeout(after) => EnrichmentError::TimedOut(after),
                BreakerError::Inner(e) => e,
            })
    }
}
