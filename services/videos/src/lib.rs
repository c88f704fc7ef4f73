//! Azora Video Service
//!
//! Video catalog for the Azora platform. Videos reference their owner by user
//! id only; user profiles live in the user service and reach this service
//! through a shared Redis cache. Every read joins videos with their owners,
//! asking the user service to populate missing users over Kafka and waiting
//! for them to appear in the cache.
//!
//! ## Features
//!
//! - **Owner Enrichment**: batched cache lookups, a single population request
//!   per call, polling until every owner is present
//! - **Circuit Breaker**: enrichment fails fast while the user service is
//!   unresponsive and probes for recovery after a cooldown
//! - **Rotating Credentials**: bearer tokens verified against a signing secret
//!   distributed on the `jwt-rotated` topic
//! - **Catalog Consistency**: videos of deleted users are purged
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API                  Redis                        Kafka
//! ┌──────────────┐        ┌──────────────┐  cache   ┌─────────────────┐
//! │ GET/POST     │        │ user id ->   │◀─────────│ users-populated │
//! │ /api/videos  │        │ User         │  writer  └─────────────────┘
//! └──────────────┘        └──────────────┘                   ▲
//!        │                       ▲                           │ user service
//!        ▼                       │ MGET                      │
//! ┌──────────────┐        ┌──────────────┐          ┌─────────────────┐
//! │ Circuit      │───────▶│ Enrichment   │─────────▶│ populate-users  │
//! │ Breaker      │        │ Engine       │          └─────────────────┘
//! └──────────────┘        └──────────────┘
//!        │                                          ┌─────────────────┐
//!        ▼                                          │ jwt-rotated     │──▶ Credential Verifier
//! ┌──────────────┐          purge                   │ user-deleted    │
//! │ PostgreSQL   │◀─────────────────────────────────│                 │
//! └──────────────┘                                  └─────────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod listeners;
pub mod models;
pub mod video_store;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{AuthError, AuthenticatedUser, CredentialVerifier, UserIdentity};
pub use cache::{CacheError, RedisUserCache, UserCache};
pub use config::Config;
pub use enrichment::{
    BreakerConfig, BusPopulationRequester, CircuitBreaker, CircuitState, Enrich, EnrichmentEngine,
    EnrichmentError, Guarded, PopulationRequester,
};
pub use error::{ApiError, ErrorResponse};
pub use listeners::spawn_listeners;
pub use models::{CreateVideoRequest, NewVideo, PopulatedVideo, Video};
pub use video_store::{PgVideoStore, StoreError, VideoRepository};
