use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub remote: RemoteConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Local control surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Remote attendance authority.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL, e.g. `https://attendance.example.com/api/v1`
    #[serde(default)]
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub access_token: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub user_id: String,

    /// Location polling cadence
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Geofence catalog reload cadence
    #[serde(default = "default_catalog_refresh")]
    pub catalog_refresh_secs: u64,

    /// Offset of the user's local time from UTC, in minutes
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Ask the remote to confirm device-side containment decisions
    #[serde(default)]
    pub corroborate_with_server: bool,

    /// Capacity of the evaluation channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How long a pushed fix stays usable for polling
    #[serde(default = "default_location_max_age")]
    pub location_max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Keep synced entries for audit instead of purging them after sync
    #[serde(default = "default_retain_synced")]
    pub retain_synced: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            retain_synced: default_retain_synced(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Trigger a sync cycle after every append while online
    #[serde(default = "default_sync_on_append")]
    pub sync_on_append: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_secs: default_sync_interval(),
            sync_on_append: default_sync_on_append(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_request_timeout() -> u64 {
    30
}
fn default_database_url() -> String {
    "sqlite://geoattend.db".to_string()
}
fn default_max_connections() -> u32 {
    4
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_remote_timeout_ms() -> u64 {
    12_000
}
fn default_poll_interval() -> u64 {
    10
}
fn default_catalog_refresh() -> u64 {
    300
}
fn default_channel_capacity() -> usize {
    256
}
fn default_location_max_age() -> u64 {
    120
}
fn default_queue_capacity() -> usize {
    2000
}
fn default_retain_synced() -> bool {
    true
}
fn default_batch_size() -> usize {
    50
}
fn default_sync_interval() -> u64 {
    15
}
fn default_sync_on_append() -> bool {
    true
}

/// Largest UTC offset accepted, in minutes (UTC+14:00).
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with GA__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("GA").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Builds the config from embedded defaults and overrides only, without
    /// touching config files. Validation is skipped to allow partial configs.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 8787
            request_timeout_secs = 30

            [database]
            url = "sqlite::memory:"
            max_connections = 1
            min_connections = 1
            connect_timeout_secs = 5
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [remote]
            base_url = ""
            access_token = ""
            timeout_ms = 12000

            [monitoring]
            user_id = ""
            poll_interval_secs = 10
            catalog_refresh_secs = 300
            utc_offset_minutes = 0
            corroborate_with_server = false
            channel_capacity = 256
            location_max_age_secs = 120

            [queue]
            capacity = 2000
            retain_synced = true

            [sync]
            batch_size = 50
            interval_secs = 15
            sync_on_append = true
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.monitoring.user_id.trim().is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "GA__MONITORING__USER_ID environment variable must be set".to_string(),
            ));
        }

        if self.remote.base_url.trim().is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "GA__REMOTE__BASE_URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.queue.capacity == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "queue.capacity must be greater than 0".to_string(),
            ));
        }

        if self.sync.batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "sync.batch_size must be greater than 0".to_string(),
            ));
        }

        if self.monitoring.poll_interval_secs == 0
            || self.monitoring.catalog_refresh_secs == 0
            || self.sync.interval_secs == 0
        {
            return Err(ConfigValidationError::InvalidValue(
                "poll, catalog refresh and sync intervals must be greater than 0".to_string(),
            ));
        }

        if self.monitoring.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(ConfigValidationError::InvalidValue(format!(
                "utc_offset_minutes must be within ±{}",
                MAX_UTC_OFFSET_MINUTES
            )));
        }

        if self.monitoring.channel_capacity == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "monitoring.channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.timeout_ms)
    }

    pub fn database_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.database.url.clone(),
            max_connections: self.database.max_connections,
            min_connections: self.database.min_connections,
            connect_timeout_secs: self.database.connect_timeout_secs,
            idle_timeout_secs: self.database.idle_timeout_secs,
        }
    }
}
