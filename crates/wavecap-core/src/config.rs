//! Configuration management for the wavecap server

use crate::types::{AudioCodec, ConversionMode};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Audio transcoding configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// Reconnection manager configuration
    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    /// Search engine configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-session outbox capacity; beyond it calls are dropped for that
    /// session only
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Capacity of the persisted-call feed into the dispatcher
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,

    /// General API rate limit per client per minute; the call-upload route
    /// bypasses it
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of pooled connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

/// Audio transcoding configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Normalization profile; `disabled` stores uploads as received
    #[serde(default)]
    pub conversion_mode: ConversionMode,

    /// Target codec
    #[serde(default)]
    pub codec: AudioCodec,

    /// Target bitrate in kbps; clamped to the codec's supported range
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: u32,
}

/// Reconnection manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// Whether calls are buffered for briefly-disconnected users
    #[serde(default = "default_reconnection_enabled")]
    pub enabled: bool,

    /// Grace window in seconds
    #[serde(default = "default_reconnection_grace")]
    pub grace_secs: u64,

    /// Maximum buffered calls per user
    #[serde(default = "default_reconnection_buffer_max")]
    pub buffer_max: usize,

    /// Sweep interval for expired records, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Search engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Hard ceiling on page size
    #[serde(default = "default_search_max_limit")]
    pub max_limit: i64,

    /// Page size used when the query does not name one
    #[serde(default = "default_search_default_limit")]
    pub default_limit: i64,

    /// Look-back window applied to undated descending queries, in seconds
    #[serde(default = "default_search_lookback")]
    pub default_lookback_secs: i64,

    /// Wall-clock bound for a single query, in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether sessions must authenticate before receiving calls
    #[serde(default = "default_user_auth_required")]
    pub user_auth_required: bool,

    /// Minimum accepted PIN length
    #[serde(default = "default_pin_min_length")]
    pub pin_min_length: usize,

    /// Failed login attempts tolerated per IP within the window
    #[serde(default = "default_login_max_failures")]
    pub login_max_failures: u32,

    /// Window over which failures are counted, in seconds
    #[serde(default = "default_login_window")]
    pub login_window_secs: u64,

    /// Penalty duration once too many failures accumulate, in seconds
    #[serde(default = "default_login_penalty")]
    pub login_penalty_secs: u64,

    /// Bearer token guarding the management routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json or text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_outbox_capacity() -> usize {
    64
}

const fn default_feed_capacity() -> usize {
    256
}

const fn default_rate_limit() -> u32 {
    300
}

fn default_database_url() -> String {
    std::env::var("WAVECAP_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .unwrap_or_else(|_| "postgresql://localhost/wavecap".to_string())
}

const fn default_max_connections() -> u32 {
    50
}

const fn default_min_connections() -> u32 {
    5
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_idle_timeout() -> u64 {
    600
}

const fn default_audio_bitrate() -> u32 {
    32
}

const fn default_reconnection_enabled() -> bool {
    true
}

const fn default_reconnection_grace() -> u64 {
    300
}

const fn default_reconnection_buffer_max() -> usize {
    32
}

const fn default_sweep_interval() -> u64 {
    30
}

const fn default_search_max_limit() -> i64 {
    500
}

const fn default_search_default_limit() -> i64 {
    200
}

const fn default_search_lookback() -> i64 {
    86_400
}

const fn default_search_timeout() -> u64 {
    30
}

const fn default_user_auth_required() -> bool {
    true
}

const fn default_pin_min_length() -> usize {
    4
}

const fn default_login_max_failures() -> u32 {
    5
}

const fn default_login_window() -> u64 {
    60
}

const fn default_login_penalty() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            outbox_capacity: default_outbox_capacity(),
            feed_capacity: default_feed_capacity(),
            rate_limit: default_rate_limit(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnection_enabled(),
            grace_secs: default_reconnection_grace(),
            buffer_max: default_reconnection_buffer_max(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_limit: default_search_max_limit(),
            default_limit: default_search_default_limit(),
            default_lookback_secs: default_search_lookback(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_auth_required: default_user_auth_required(),
            pin_min_length: default_pin_min_length(),
            login_max_failures: default_login_max_failures(),
            login_window_secs: default_login_window(),
            login_penalty_secs: default_login_penalty(),
            admin_token: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from an optional `wavecap` file merged with
    /// `WAVECAP_`-prefixed environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or parsed.
    pub fn load() -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("wavecap").required(false))
            .add_source(
                config::Environment::with_prefix("WAVECAP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::Error::InvalidArgument {
                field: "config".to_string(),
                message: e.to_string(),
            })?;

        config
            .try_deserialize()
            .map_err(|e| crate::Error::InvalidArgument {
                field: "config".to_string(),
                message: e.to_string(),
            })
    }
}
