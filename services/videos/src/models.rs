use azora_pipeline::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// Stored video record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Video {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Id of the owning user in the user service
    pub owner_user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a video
#[derive(Debug, Clone, PartialEq)]
pub struct NewVideo {
    pub title: String,
    pub description: String,
    pub owner_user_id: String,
}

/// Video joined with its owner. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulatedVideo {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub owner: User,
}

impl PopulatedVideo {
    pub fn new(video: &Video, owner: User) -> Self {
        Self {
            id: video.id,
            title: video.title.clone(),
            description: video.description.clone(),
            owner,
        }
    }
}

/// Body of `POST /api/videos`
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVideoRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// A rejected input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl CreateVideoRequest {
    /// Check length limits, collecting every failing field
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        let title_len = self.title.chars().count();
        if title_len == 0 || title_len > TITLE_MAX_CHARS {
            errors.push(FieldError {
                field: "title",
                message: format!("must be between 1 and {} characters", TITLE_MAX_CHARS),
            });
        }

        if self.description.chars().count() > DESCRIPTION_MAX_CHARS {
            errors.push(FieldError {
                field: "description",
                message: format!("must be at most {} characters", DESCRIPTION_MAX_CHARS),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn into_new_video(self, owner_user_id: String) -> NewVideo {
        NewVideo {
            title: self.title,
            description: self.description,
            owner_user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str, description: &str) -> CreateVideoRequest {
        CreateVideoRequest {
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request("Intro", "").validate().is_ok());
        assert!(request(&"t".repeat(100), &"d".repeat(500)).validate().is_ok());
    }

    #[test]
    fn test_collects_every_field_error() {
        let errors = request("", &"d".repeat(501)).validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["title", "description"]);
    }

    #[test]
    fn test_limits_count_characters_not_bytes() {
        // 100 two-byte characters
        assert!(request(&"é".repeat(100), "").validate().is_ok());
        assert!(request(&"é".repeat(101), "").validate().is_err());
    }
}
