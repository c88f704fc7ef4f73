//! Event listeners keeping local state in step with the rest of the platform.
//!
//! | Topic             | Group                          | Effect                    |
//! |-------------------|--------------------------------|---------------------------|
//! | `jwt-rotated`     | `jwt-group-<uuid>`, from start | rotate the signing secret |
//! | `user-deleted`    | shared, latest                 | purge the user's videos   |
//! | `users-populated` | shared, latest                 | write users into cache    |
//!
//! Every instance needs every secret rotation, so the rotation group is
//! unique per process and replays the topic from the beginning.

use crate::auth::CredentialVerifier;
use crate::cache::UserCache;
use crate::config::ListenerConfig;
use crate::video_store::VideoRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use azora_pipeline::{
    ConsumerError, EventGateway, EventHandler, JwtRotated, UserDeleted, UsersPopulated,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Applies `jwt-rotated` events to the verifier
pub struct RotateSecret {
    verifier: Arc<CredentialVerifier>,
}

impl RotateSecret {
    pub fn new(verifier: Arc<CredentialVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl EventHandler<JwtRotated> for RotateSecret {
    async fn handle(&self, event: JwtRotated) -> Result<(), ConsumerError> {
        self.verifier.rotate(&event.jwt);
        Ok(())
    }
}

/// Removes a deleted user's videos
pub struct PurgeOwnerVideos {
    store: Arc<dyn VideoRepository>,
}

impl PurgeOwnerVideos {
    pub fn new(store: Arc<dyn VideoRepository>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler<UserDeleted> for PurgeOwnerVideos {
    async fn handle(&self, event: UserDeleted) -> Result<(), ConsumerError> {
        let deleted = self
            .store
            .delete_by_owner(&event.id)
            .await
            .map_err(|e| ConsumerError::ProcessingError(e.to_string()))?;

        info!(user_id = %event.id, deleted, "Purged videos of deleted user");
        Ok(())
    }
}

/// Writes populated users into the cache, keyed by id
pub struct CacheUsers {
    cache: Arc<dyn UserCache>,
}

impl CacheUsers {
    pub fn new(cache: Arc<dyn UserCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl EventHandler<UsersPopulated> for CacheUsers {
    async fn handle(&self, event: UsersPopulated) -> Result<(), ConsumerError> {
        let count = event.users.len();
        let users = event
            .users
            .into_iter()
            .map(|user| (user.id.clone(), user))
            .collect();

        self.cache
            .set_many(users)
            .await
            .map_err(|e| ConsumerError::ProcessingError(e.to_string()))?;

        debug!(count, "Cached populated users");
        Ok(())
    }
}

/// Subscribe all listeners and drive them until `shutdown` fires
pub async fn spawn_listeners(
    config: &ListenerConfig,
    gateway: &EventGateway,
    verifier: Arc<CredentialVerifier>,
    store: Arc<dyn VideoRepository>,
    cache: Arc<dyn UserCache>,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>> {
    let jwt_group = format!("{}-{}", config.jwt_group_prefix, Uuid::new_v4());

    let rotations = gateway
        .subscribe::<JwtRotated>(&jwt_group, true)
        .await
        .context("Failed to subscribe to secret rotations")?;
    let deletions = gateway
        .subscribe::<UserDeleted>(&config.user_deleted_group, false)
        .await
        .context("Failed to subscribe to user deletions")?;
    let populated = gateway
        .subscribe::<UsersPopulated>(&config.users_populated_group, false)
        .await
        .context("Failed to subscribe to populated users")?;

    info!(jwt_group = %jwt_group, "Event listeners subscribed");

    Ok(vec![
        tokio::spawn(rotations.run(Arc::new(RotateSecret::new(verifier)), shutdown.clone())),
        tokio::spawn(deletions.run(Arc::new(PurgeOwnerVideos::new(store)), shutdown.clone())),
        tokio::spawn(populated.run(Arc::new(CacheUsers::new(cache)), shutdown)),
    ])
}
