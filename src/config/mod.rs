//! Configuration management for expert-availability
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum number of members the availability provider accepts per request
pub const PROVIDER_MAX_MEMBERS: usize = 10;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Availability provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Search index sink configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Periodic refresh configuration
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Read cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Error ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("EXPERT_AVAILABILITY_SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("EXPERT_AVAILABILITY_SERVER_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid port number".to_string()))?;
        }
        if let Ok(level) = std::env::var("EXPERT_AVAILABILITY_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database.path = path;
        }

        config.provider.access_token = non_empty_var("CRONOFY_ACCESS_TOKEN");
        config.search.app_id = non_empty_var("ALGOLIA_APP_ID");
        config.search.api_key = non_empty_var("ALGOLIA_API_KEY");
        if let Some(index) = non_empty_var("ALGOLIA_INDEX_NAME") {
            config.search.index_name = index;
        }

        if let Ok(minutes) = std::env::var("AVAILABILITY_UPDATE_INTERVAL_MINUTES") {
            config.scheduler.interval_minutes = minutes.parse().map_err(|_| {
                ConfigError::Parse("Invalid AVAILABILITY_UPDATE_INTERVAL_MINUTES".to_string())
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.max_batch_size == 0 || self.provider.max_batch_size > PROVIDER_MAX_MEMBERS
        {
            return Err(ConfigError::InvalidValue(format!(
                "provider.max_batch_size must be between 1 and {}",
                PROVIDER_MAX_MEMBERS
            )));
        }
        if self.provider.max_calendars_per_request == 0 {
            return Err(ConfigError::InvalidValue(
                "provider.max_calendars_per_request must be at least 1".to_string(),
            ));
        }
        if self.scheduler.interval_minutes == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.search.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "search.batch_size must be at least 1".to_string(),
            ));
        }
        self.ledger.tz()?;
        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "expert-availability.db".to_string()
}

/// Strategy used to split the roster into provider requests
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchingStrategy {
    /// Contiguous groups of at most `max_batch_size` experts
    #[default]
    Positional,
    /// Additionally bounded by total calendars per request
    CalendarCount,
}

/// Availability provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Availability endpoint
    #[serde(default = "default_provider_url")]
    pub api_url: String,

    /// Bearer token; when absent every expert resolves to unknown availability
    #[serde(default)]
    pub access_token: Option<String>,

    /// Hard wall-clock timeout per request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Experts per request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Calendars per request (calendar_count batching only)
    #[serde(default = "default_max_calendars")]
    pub max_calendars_per_request: usize,

    #[serde(default)]
    pub batching: BatchingStrategy,

    /// Query window length starting now
    #[serde(default = "default_query_window_days")]
    pub query_window_days: i64,

    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,

    #[serde(default)]
    pub buffer_before_minutes: u32,

    #[serde(default)]
    pub buffer_after_minutes: u32,

    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: default_provider_url(),
            access_token: None,
            request_timeout_secs: default_request_timeout(),
            max_batch_size: default_max_batch_size(),
            max_calendars_per_request: default_max_calendars(),
            batching: BatchingStrategy::default(),
            query_window_days: default_query_window_days(),
            duration_minutes: default_duration_minutes(),
            buffer_before_minutes: 0,
            buffer_after_minutes: 0,
            max_results: default_max_results(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_provider_url() -> String {
    "https://api.cronofy.com/v1/availability".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_batch_size() -> usize {
    PROVIDER_MAX_MEMBERS
}

fn default_max_calendars() -> usize {
    15
}

fn default_query_window_days() -> i64 {
    30
}

fn default_duration_minutes() -> u32 {
    60
}

fn default_max_results() -> u32 {
    256
}

/// Retry configuration for external API calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    1_000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

/// Rate limiting configuration for the provider client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Minimum interval between requests in milliseconds
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Maximum number of concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_min_interval() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    2
}

/// Search index sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default)]
    pub app_id: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Overrides `https://{app_id}.algolia.net`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Records per sink request
    #[serde(default = "default_search_batch_size")]
    pub batch_size: usize,
}

impl SearchConfig {
    /// The sink is only active when both credentials are present
    pub fn is_configured(&self) -> bool {
        self.app_id.is_some() && self.api_key.is_some()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            api_key: None,
            index_name: default_index_name(),
            base_url: None,
            batch_size: default_search_batch_size(),
        }
    }
}

fn default_index_name() -> String {
    "experts".to_string()
}

fn default_search_batch_size() -> usize {
    100
}

/// Periodic refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Delay before the startup pass
    #[serde(default)]
    pub initial_delay_secs: u64,

    /// Pause between consecutive provider batches
    #[serde(default = "default_inter_batch_delay")]
    pub inter_batch_delay_ms: u64,

    /// Upper bound on one scheduled pass
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_minutes: default_interval_minutes(),
            initial_delay_secs: 0,
            inter_batch_delay_ms: default_inter_batch_delay(),
            pass_timeout_secs: default_pass_timeout(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_inter_batch_delay() -> u64 {
    500
}

fn default_pass_timeout() -> u64 {
    1800
}

/// Read cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Default entry TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}

/// Error ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerConfig {
    /// IANA zone used for the human-readable failure time
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl LedgerConfig {
    /// Parse the configured zone
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("Unknown timezone: {}", self.timezone)))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

fn default_timezone() -> String {
    "Australia/Melbourne".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
