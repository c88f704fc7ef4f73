//! Wire events exchanged between Azora services.
//!
//! Every event knows which configured topic it travels on. Field names follow
//! the camelCase convention of the other services on the bus.

use crate::config::TopicConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A typed payload bound to one topic
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Short name used in logs and metrics
    const NAME: &'static str;

    /// Resolve the topic this event is published on
    fn topic(topics: &TopicConfig) -> &str;
}

/// User profile details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub description: String,
}

/// User record as owned by the user service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub profile: Profile,
}

/// The signing secret for bearer tokens was replaced
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtRotated {
    pub jwt: String,
}

// Keep the secret out of debug output.
impl std::fmt::Debug for JwtRotated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtRotated").field("jwt", &"<redacted>").finish()
    }
}

impl Event for JwtRotated {
    const NAME: &'static str = "jwt_rotated";

    fn topic(topics: &TopicConfig) -> &str {
        &topics.jwt_rotated
    }
}

/// A user was removed from the user service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDeleted {
    pub id: String,
}

impl Event for UserDeleted {
    const NAME: &'static str = "user_deleted";

    fn topic(topics: &TopicConfig) -> &str {
        &topics.user_deleted
    }
}

/// Ask the user service to write these users into the shared cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulateUsers {
    #[serde(rename = "userIds")]
    pub user_ids: Vec<String>,
}

impl Event for PopulateUsers {
    const NAME: &'static str = "populate_users";

    fn topic(topics: &TopicConfig) -> &str {
        &topics.populate_users
    }
}

/// Users resolved in answer to one or more population requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersPopulated {
    pub users: Vec<User>,
}

impl Event for UsersPopulated {
    const NAME: &'static str = "users_populated";

    fn topic(topics: &TopicConfig) -> &str {
        &topics.users_populated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn test_topics_follow_config() {
        let mut topics = TopicConfig::default();
        assert_eq!(PopulateUsers::topic(&topics), "populate-users");
        assert_eq!(UsersPopulated::topic(&topics), "users-populated");

        topics.jwt_rotated = "staging.jwt-rotated".to_string();
        assert_eq!(JwtRotated::topic(&topics), "staging.jwt-rotated");
    }

    #[test]
    fn test_users_populated_ignores_unknown_profile_fields() {
        #[derive(Serialize)]
        struct ForeignProfile<'a> {
            id: &'a str,
            avatar: &'a str,
            description: &'a str,
        }
        #[derive(Serialize)]
        struct ForeignUser<'a> {
            id: &'a str,
            username: &'a str,
            email: &'a str,
            profile: ForeignProfile<'a>,
        }
        #[derive(Serialize)]
        struct ForeignPayload<'a> {
            users: Vec<ForeignUser<'a>>,
        }

        let payload = codec::encode(&ForeignPayload {
            users: vec![ForeignUser {
                id: "u1",
                username: "ada",
                email: "ada@example.com",
                profile: ForeignProfile {
                    id: "p1",
                    avatar: "https://cdn.example.com/ada.png",
                    description: "",
                },
            }],
        })
        .unwrap();

        let event: UsersPopulated = codec::decode(&payload).unwrap();
        assert_eq!(event.users.len(), 1);
        assert_eq!(event.users[0].username, "ada");
        assert_eq!(event.users[0].profile.avatar, "https://cdn.example.com/ada.png");
    }

    #[test]
    fn test_jwt_rotated_debug_is_redacted() {
        let event = JwtRotated {
            jwt: "top-secret".to_string(),
        };
        assert!(!format!("{:?}", event).contains("top-secret"));
    }
}
