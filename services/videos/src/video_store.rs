use crate::config::DatabaseConfig;
use crate::models::{NewVideo, Video};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for the video catalog
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// All videos, oldest first
    async fn list(&self) -> Result<Vec<Video>, StoreError>;

    async fn create(&self, video: NewVideo) -> Result<Video, StoreError>;

    /// Remove every video owned by `owner_user_id`, returning how many went
    async fn delete_by_owner(&self, owner_user_id: &str) -> Result<u64, StoreError>;

    async fn count_by_owner(&self, owner_user_id: &str) -> Result<i64, StoreError>;

    /// Round-trip to the database (for readiness checks)
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Video catalog in PostgreSQL
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    /// Create a new video store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl VideoRepository for PgVideoStore {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Video>, StoreError> {
        let videos = sqlx::query_as::<_, Video>(
            r#"
            SELECT id, title, description, owner_user_id, created_at
            FROM videos
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        debug!(count = videos.len(), "Listed videos");
        Ok(videos)
    }

    #[instrument(skip(self, video), fields(owner_user_id = %video.owner_user_id))]
    async fn create(&self, video: NewVideo) -> Result<Video, StoreError> {
        let created = sqlx::query_as::<_, Video>(
            r#"
            INSERT INTO videos (id, title, description, owner_user_id, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, title, description, owner_user_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.owner_user_id)
        .fetch_one(&self.pool)
        .await?;

        debug!(video_id = %created.id, "Video created");
        metrics::counter!("videos.store.created").increment(1);

        Ok(created)
    }

    #[instrument(skip(self))]
    async fn delete_by_owner(&self, owner_user_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM videos WHERE owner_user_id = $1")
            .bind(owner_user_id)
            .execute(&self.pool)
            .await?;

        metrics::counter!("videos.store.deleted").increment(result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn count_by_owner(&self, owner_user_id: &str) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM videos WHERE owner_user_id = $1")
            .bind(owner_user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryVideoStore;
    use super::*;

    fn new_video(title: &str, owner: &str) -> NewVideo {
        NewVideo {
            title: title.to_string(),
            description: String::new(),
            owner_user_id: owner.to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_delete_by_owner() {
        let store = MemoryVideoStore::default();
        store.create(new_video("a", "u1")).await.unwrap();
        store.create(new_video("b", "u2")).await.unwrap();
        store.create(new_video("c", "u1")).await.unwrap();

        assert_eq!(store.delete_by_owner("u1").await.unwrap(), 2);
        assert_eq!(store.count_by_owner("u1").await.unwrap(), 0);
        assert_eq!(store.count_by_owner("u2").await.unwrap(), 1);

        let titles: Vec<_> = store.list().await.unwrap().into_iter().map(|v| v.title).collect();
        assert_eq!(titles, vec!["b"]);
    }
}
