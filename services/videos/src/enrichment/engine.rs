use super::{Enrich, EnrichmentError, PopulationRequester};
use crate::cache::UserCache;
use crate::models::{PopulatedVideo, Video};
use async_trait::async_trait;
use azora_pipeline::User;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Joins videos with their owners from the user cache.
///
/// Owners missing from the cache are requested from the user service once,
/// then the cache is polled until every owner is present. The loop has no
/// bound of its own; callers run it under a deadline.
pub struct EnrichmentEngine {
    cache: Arc<dyn UserCache>,
    requester: Arc<dyn PopulationRequester>,
    poll_interval: Duration,
}

impl EnrichmentEngine {
    pub fn new(
        cache: Arc<dyn UserCache>,
        requester: Arc<dyn PopulationRequester>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cache,
            requester,
            poll_interval,
        }
    }

    async fn resolve_owners(
        &self,
        mut missing: Vec<String>,
    ) -> Result<HashMap<String, User>, EnrichmentError> {
        let mut resolved = HashMap::with_capacity(missing.len());
        let mut requested = false;
        let mut polls = 0u32;

        loop {
            let found = self.cache.get_many(&missing).await?;
            missing.retain(|id| !found.contains_key(id));
            resolved.extend(found);

            if missing.is_empty() {
                debug!(polls, "all owners resolved");
                return Ok(resolved);
            }

            if !requested {
                debug!(missing = missing.len(), "requesting user population");
                self.requester.request(missing.clone()).await?;
                metrics::counter!("videos.enrichment.population_requests").increment(1);
                requested = true;
            }

            polls += 1;
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Owner ids in first-seen order, without duplicates
fn distinct_owner_ids(videos: &[Video]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(videos.len());
    let mut ids = Vec::new();
    for video in videos {
        if seen.insert(video.owner_user_id.as_str()) {
            ids.push(video.owner_user_id.clone());
        }
    }
    ids
}

#[async_trait]
impl Enrich for EnrichmentEngine {
    #[instrument(skip_all, fields(videos = videos.len()))]
    async fn enrich(&self, videos: &[Video]) -> Result<Vec<PopulatedVideo>, EnrichmentError> {
        if videos.is_empty() {
            return Ok(Vec::new());
        }

        let owners = self.resolve_owners(distinct_owner_ids(videos)).await?;

        videos
            .iter()
            .map(|video| {
                owners
                    .get(&video.owner_user_id)
                    .cloned()
                    .map(|owner| PopulatedVideo::new(video, owner))
                    .ok_or_else(|| EnrichmentError::MissingOwner(video.owner_user_id.clone()))
            })
            .collect()
    }
}
