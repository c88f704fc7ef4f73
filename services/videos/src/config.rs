use anyhow::ensure;
use azora_pipeline::memory::DEFAULT_RETENTION;
use azora_pipeline::KafkaConfig;
use serde::Deserialize;
use std::time::Duration;

use crate::enrichment::BreakerConfig;

/// Main configuration for the video service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka configuration
    #[serde(default)]
    pub kafka: KafkaConfig,
    /// Event bus selection
    #[serde(default)]
    pub bus: BusConfig,
    /// Redis cache configuration
    pub redis: RedisConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Owner enrichment configuration
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    /// Event listener configuration
    #[serde(default)]
    pub listeners: ListenerConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Which event bus implementation to run against
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    #[default]
    Kafka,
    /// In-process bus, for running without a broker
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub backend: BusBackend,
    /// Messages kept per topic by the in-process bus
    #[serde(default = "default_memory_retention")]
    pub memory_retention: usize,
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Maximum pooled connections
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Owner enrichment and circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// Delay between cache polls while waiting for population
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Time budget for one enrichment call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Failure percentage within the rolling window that opens the breaker
    #[serde(default = "default_error_threshold_percentage")]
    pub error_threshold_percentage: u8,
    /// Length of the rolling window in milliseconds
    #[serde(default = "default_rolling_window_ms")]
    pub rolling_window_ms: u64,
    /// Minimum calls in the window before the breaker may open
    #[serde(default)]
    pub volume_threshold: u32,
    /// How long the breaker stays open before a trial call
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

/// Consumer groups for the event listeners
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Prefix for the per-instance key rotation group
    #[serde(default = "default_jwt_group_prefix")]
    pub jwt_group_prefix: String,
    /// Shared group for user deletions
    #[serde(default = "default_user_deleted_group")]
    pub user_deleted_group: String,
    /// Shared group for population results
    #[serde(default = "default_users_populated_group")]
    pub users_populated_group: String,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "video-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_memory_retention() -> usize {
    DEFAULT_RETENTION
}

fn default_redis_pool_size() -> usize {
    16
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_error_threshold_percentage() -> u8 {
    50
}

fn default_rolling_window_ms() -> u64 {
    10000
}

fn default_reset_timeout_ms() -> u64 {
    10000
}

fn default_jwt_group_prefix() -> String {
    "jwt-group".to_string()
}

fn default_user_deleted_group() -> String {
    "user-deleted-group".to_string()
}

fn default_users_populated_group() -> String {
    "users-populated-group".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    5001
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/videos").required(false))
            .add_source(config::File::with_name("/etc/azora/videos").required(false))
            // VIDEOS__KAFKA__BOOTSTRAP_SERVERS -> kafka.bootstrap_servers
            .add_source(
                config::Environment::with_prefix("VIDEOS")
                    .separator("__")
                    .try_parsing(true),
            )
            // Variables shared with the rest of the platform's deployments
            .set_override_option("kafka.bootstrap_servers", std::env::var("KAFKA_URI").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URI").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .build()?;

        let mut config: Self = config.try_deserialize()?;
        config.apply_kafka_credentials(
            std::env::var("KAFKA_USERNAME").ok(),
            std::env::var("KAFKA_PASSWORD").ok(),
        );
        config.validate()?;
        Ok(config)
    }

    /// Apply the platform's shared Kafka credentials.
    ///
    /// The rest of the platform authenticates with SCRAM-SHA-256, so a username
    /// also switches the connection to SASL.
    fn apply_kafka_credentials(&mut self, username: Option<String>, password: Option<String>) {
        if let Some(username) = username {
            self.kafka.sasl.username = Some(username);
            self.kafka.require_sasl();
        }
        if password.is_some() {
            self.kafka.sasl.password = password;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.kafka.validate()?;
        self.enrichment.validate()?;
        Ok(())
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl EnrichmentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.poll_interval_ms > 0,
            "enrichment.poll_interval_ms must be greater than zero"
        );
        ensure!(self.timeout_ms > 0, "enrichment.timeout_ms must be greater than zero");
        ensure!(
            self.error_threshold_percentage <= 100,
            "enrichment.error_threshold_percentage must be at most 100, got {}",
            self.error_threshold_percentage
        );
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Circuit breaker parameters
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            error_threshold_percentage: self.error_threshold_percentage,
            rolling_window: Duration::from_millis(self.rolling_window_ms),
            volume_threshold: self.volume_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            error_threshold_percentage: default_error_threshold_percentage(),
            rolling_window_ms: default_rolling_window_ms(),
            volume_threshold: 0,
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::default(),
            memory_retention: default_memory_retention(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            jwt_group_prefix: default_jwt_group_prefix(),
            user_deleted_group: default_user_deleted_group(),
            users_populated_group: default_users_populated_group(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azora_pipeline::SecurityProtocol;

    #[test]
    fn test_default_values() {
        assert_eq!(default_poll_interval_ms(), 50);
        assert_eq!(default_api_port(), 5001);
        assert_eq!(default_user_deleted_group(), "user-deleted-group");
    }

    #[test]
    fn test_breaker_defaults() {
        let breaker = EnrichmentConfig::default().breaker();
        assert_eq!(breaker.timeout, Duration::from_secs(3));
        assert_eq!(breaker.error_threshold_percentage, 50);
        assert_eq!(breaker.reset_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_enrichment_validation() {
        assert!(EnrichmentConfig::default().validate().is_ok());

        let spinning = EnrichmentConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(spinning.validate().is_err());

        let never_opens = EnrichmentConfig {
            error_threshold_percentage: 101,
            ..Default::default()
        };
        assert!(never_opens.validate().is_err());
    }

    #[test]
    fn test_platform_credentials_enable_sasl() {
        let mut config = minimal_config();
        config.apply_kafka_credentials(Some("videos".to_string()), Some("secret".to_string()));

        assert_eq!(config.kafka.sasl.username.as_deref(), Some("videos"));
        assert_eq!(config.kafka.sasl.password.as_deref(), Some("secret"));
        assert_eq!(config.kafka.security_protocol, SecurityProtocol::SaslPlaintext);
        assert!(config.validate().is_ok());

        let producer = config.kafka.build_producer_config();
        assert_eq!(producer.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
        assert_eq!(producer.get("security.protocol"), Some("sasl_plaintext"));
    }

    #[test]
    fn test_platform_credentials_absent_leaves_protocol() {
        let mut config = minimal_config();
        config.apply_kafka_credentials(None, None);

        assert_eq!(config.kafka.security_protocol, SecurityProtocol::Plaintext);
        assert!(config.kafka.sasl.username.is_none());
        assert!(config.validate().is_ok());
    }

    fn minimal_config() -> Config {
        config::Config::builder()
            .set_override("redis.url", "redis://localhost:6379")
            .unwrap()
            .set_override("database.url", "postgres://localhost/videos")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = config::Config::builder()
            .set_override("redis.url", "redis://localhost:6379")
            .unwrap()
            .set_override("database.url", "postgres://localhost/videos")
            .unwrap()
            .set_override("bus.backend", "memory")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.bus.backend, BusBackend::Memory);
        assert_eq!(config.bus.memory_retention, DEFAULT_RETENTION);
        assert_eq!(config.kafka.topics.jwt_rotated, "jwt-rotated");
        assert_eq!(config.enrichment.poll_interval(), Duration::from_millis(50));
        assert!(config.database.run_migrations);
    }
}
