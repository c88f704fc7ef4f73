//! Kafka configuration for the Azora event bus.
//!
//! Connection, security and tuning settings shared by every producer and
//! consumer the bus creates. Consumer group ids are not part of this
//! configuration: each subscription names its own group.

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Security protocol for Kafka connections
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }

    pub fn uses_sasl(&self) -> bool {
        matches!(self, SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl)
    }
}

/// SASL mechanism for authentication
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaslMechanism {
    Plain,
    #[default]
    ScramSha256,
    ScramSha512,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// SSL/TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslConfig {
    /// Path to CA certificate file
    pub ca_location: Option<String>,
    /// Path to client certificate file
    pub certificate_location: Option<String>,
    /// Path to client private key file
    pub key_location: Option<String>,
    /// Enable certificate verification
    #[serde(default = "default_true")]
    pub enable_verification: bool,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            ca_location: None,
            certificate_location: None,
            key_location: None,
            enable_verification: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// SASL authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SaslConfig {
    #[serde(default)]
    pub mechanism: SaslMechanism,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Delivery settings for producers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Number of retries for failed sends
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Retry backoff in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Required acknowledgments: 0, 1, or all
    #[serde(default = "default_acks")]
    pub acks: String,
}

fn default_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_acks() -> String {
    "all".to_string()
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            acks: default_acks(),
        }
    }
}

/// Consumer tuning shared by every subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Auto commit interval in milliseconds
    #[serde(default = "default_auto_commit_interval")]
    pub auto_commit_interval_ms: u64,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Maximum poll interval in milliseconds
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_ms: u64,
    /// Messages buffered between the broker poll task and the subscriber
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_auto_commit_interval() -> u64 {
    5000
}

fn default_session_timeout() -> u64 {
    30000
}

fn default_heartbeat_interval() -> u64 {
    3000
}

fn default_max_poll_interval() -> u64 {
    300000
}

fn default_buffer_size() -> usize {
    256
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            auto_commit_interval_ms: default_auto_commit_interval(),
            session_timeout_ms: default_session_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_poll_interval_ms: default_max_poll_interval(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Topic names used by the Azora services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicConfig {
    /// Signing secret rotations
    #[serde(default = "default_jwt_rotated_topic")]
    pub jwt_rotated: String,
    /// User removals
    #[serde(default = "default_user_deleted_topic")]
    pub user_deleted: String,
    /// Requests for the user service to materialize users into the cache
    #[serde(default = "default_populate_users_topic")]
    pub populate_users: String,
    /// Users materialized by the user service
    #[serde(default = "default_users_populated_topic")]
    pub users_populated: String,
}

fn default_jwt_rotated_topic() -> String {
    "jwt-rotated".to_string()
}

fn default_user_deleted_topic() -> String {
    "user-deleted".to_string()
}

fn default_populate_users_topic() -> String {
    "populate-users".to_string()
}

fn default_users_populated_topic() -> String {
    "users-populated".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            jwt_rotated: default_jwt_rotated_topic(),
            user_deleted: default_user_deleted_topic(),
            populate_users: default_populate_users_topic(),
            users_populated: default_users_populated_topic(),
        }
    }
}

/// Main Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated list of broker addresses
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    /// Client ID for this connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Security protocol
    #[serde(default)]
    pub security_protocol: SecurityProtocol,
    /// SSL configuration
    #[serde(default)]
    pub ssl: SslConfig,
    /// SASL configuration
    #[serde(default)]
    pub sasl: SaslConfig,
    /// Producer delivery settings
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    /// Consumer settings
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Topic configuration
    #[serde(default)]
    pub topics: TopicConfig,
    /// Additional librdkafka properties
    #[serde(default)]
    pub extra_properties: HashMap<String, String>,
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_client_id() -> String {
    "azora-videos".to_string()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            client_id: default_client_id(),
            security_protocol: SecurityProtocol::default(),
            ssl: SslConfig::default(),
            sasl: SaslConfig::default(),
            reliability: ReliabilityConfig::default(),
            consumer: ConsumerConfig::default(),
            topics: TopicConfig::default(),
            extra_properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Create a new KafkaConfig with the specified bootstrap servers
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Default::default()
        }
    }

    /// Switch to the SASL variant of the configured protocol
    pub fn require_sasl(&mut self) {
        self.security_protocol = match self.security_protocol {
            SecurityProtocol::Plaintext => SecurityProtocol::SaslPlaintext,
            SecurityProtocol::Ssl => SecurityProtocol::SaslSsl,
            sasl => sasl,
        };
    }

    /// Build a base rdkafka ClientConfig from this configuration
    fn build_base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("security.protocol", self.security_protocol.as_str());

        if let Some(ref ca) = self.ssl.ca_location {
            config.set("ssl.ca.location", ca);
        }
        if let Some(ref cert) = self.ssl.certificate_location {
            config.set("ssl.certificate.location", cert);
        }
        if let Some(ref key) = self.ssl.key_location {
            config.set("ssl.key.location", key);
        }
        if !self.ssl.enable_verification {
            config.set("enable.ssl.certificate.verification", "false");
        }

        if self.security_protocol.uses_sasl() {
            config.set("sasl.mechanism", self.sasl.mechanism.as_str());
            if let Some(ref username) = self.sasl.username {
                config.set("sasl.username", username);
            }
            if let Some(ref password) = self.sasl.password {
                config.set("sasl.password", password);
            }
        }

        for (key, value) in &self.extra_properties {
            config.set(key, value);
        }

        config
    }

    /// Build a producer ClientConfig
    pub fn build_producer_config(&self) -> ClientConfig {
        let mut config = self.build_base_config();

        config.set("retries", self.reliability.retries.to_string());
        config.set("retry.backoff.ms", self.reliability.retry_backoff_ms.to_string());
        config.set("request.timeout.ms", self.reliability.request_timeout_ms.to_string());
        config.set("acks", &self.reliability.acks);

        config
    }

    /// Build a consumer ClientConfig bound to `group_id`.
    ///
    /// `from_beginning` only matters for groups without committed offsets,
    /// which is always the case for per-instance groups.
    pub fn build_consumer_config(&self, group_id: &str, from_beginning: bool) -> ClientConfig {
        let mut config = self.build_base_config();

        config.set("group.id", group_id);
        config.set(
            "auto.offset.reset",
            if from_beginning { "earliest" } else { "latest" },
        );
        // Only offsets acknowledged after handling are committed
        config.set("enable.auto.commit", "true");
        config.set("enable.auto.offset.store", "false");
        config.set(
            "auto.commit.interval.ms",
            self.consumer.auto_commit_interval_ms.to_string(),
        );
        config.set(
            "session.timeout.ms",
            self.consumer.session_timeout_ms.to_string(),
        );
        config.set(
            "heartbeat.interval.ms",
            self.consumer.heartbeat_interval_ms.to_string(),
        );
        config.set(
            "max.poll.interval.ms",
            self.consumer.max_poll_interval_ms.to_string(),
        );

        config
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.reliability.request_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "bootstrap_servers".to_string(),
            ));
        }

        if self.security_protocol.uses_sasl() && self.sasl.username.is_none() {
            return Err(ConfigError::MissingRequired(
                "sasl.username (required for SASL)".to_string(),
            ));
        }

        // Credentials are only sent over SASL protocols
        if !self.security_protocol.uses_sasl() && self.sasl.username.is_some() {
            return Err(ConfigError::InvalidValue {
                key: "security_protocol".to_string(),
                message: format!(
                    "{} does not authenticate; use a sasl_* protocol with sasl.username",
                    self.security_protocol.as_str()
                ),
            });
        }

        if self.consumer.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "consumer.buffer_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KafkaConfig::default();
        assert_eq!(config.bootstrap_servers, "localhost:9092");
        assert_eq!(config.topics.populate_users, "populate-users");
        assert_eq!(config.sasl.mechanism, SaslMechanism::ScramSha256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sasl_requires_username() {
        let mut config = KafkaConfig::new("broker:9092");
        config.security_protocol = SecurityProtocol::SaslPlaintext;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));

        config.sasl.username = Some("videos".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_consumer_config_offset_reset() {
        let config = KafkaConfig::new("localhost:9092");

        let replay = config.build_consumer_config("jwt-group-1", true);
        assert_eq!(replay.get("group.id"), Some("jwt-group-1"));
        assert_eq!(replay.get("auto.offset.reset"), Some("earliest"));

        let tail = config.build_consumer_config("user-deleted-group", false);
        assert_eq!(tail.get("auto.offset.reset"), Some("latest"));
    }

    #[test]
    fn test_consumer_commits_only_stored_offsets() {
        let consumer = KafkaConfig::default().build_consumer_config("user-deleted-group", false);
        assert_eq!(consumer.get("enable.auto.commit"), Some("true"));
        assert_eq!(consumer.get("enable.auto.offset.store"), Some("false"));
    }

    #[test]
    fn test_credentials_rejected_without_sasl_protocol() {
        let mut config = KafkaConfig::new("broker:9092");
        config.sasl.username = Some("videos".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        config.require_sasl();
        assert_eq!(config.security_protocol, SecurityProtocol::SaslPlaintext);
        assert!(config.validate().is_ok());

        config.security_protocol = SecurityProtocol::Ssl;
        config.require_sasl();
        assert_eq!(config.security_protocol, SecurityProtocol::SaslSsl);
    }

    #[test]
    fn test_sasl_settings_only_for_sasl_protocols() {
        let mut config = KafkaConfig::new("localhost:9092");
        config.sasl.username = Some("videos".to_string());
        assert!(config.build_producer_config().get("sasl.mechanism").is_none());

        config.security_protocol = SecurityProtocol::SaslSsl;
        let producer = config.build_producer_config();
        assert_eq!(producer.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
        assert_eq!(producer.get("sasl.username"), Some("videos"));
    }
}
