// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::Level;

use streamvault_core::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY, DEFAULT_STREAM_TTL_HOURS,
};

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/audio".to_string()
}

const fn default_max_frame_bytes() -> usize {
    // 1 MiB; large enough for any sensible upload chunk, small enough to
    // bound per-connection memory.
    1024 * 1024
}

/// Listener and WebSocket endpoint configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ServerConfig {
    /// Interface the TCP listener binds to
    #[serde(default = "default_listen_address")]
    pub address: String,
    /// Port the TCP listener binds to
    #[serde(default = "default_port")]
    pub port: u16,
    /// HTTP path upgraded to the streaming WebSocket
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Largest accepted WebSocket frame, text or binary
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

const fn default_stream_ttl_hours() -> u64 {
    DEFAULT_STREAM_TTL_HOURS
}

const fn default_gc_interval_secs() -> u64 {
    3600
}

const fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

const fn default_pool_capacity() -> usize {
    DEFAULT_POOL_CAPACITY
}

/// Cache directory and stream lifecycle configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct CacheConfig {
    /// Directory holding one `<streamId>.cache` file per stream
    #[serde(default = "default_cache_dir")]
    pub directory: String,
    /// Streams idle longer than this many hours are garbage-collected
    #[serde(default = "default_stream_ttl_hours")]
    pub stream_ttl_hours: u64,
    /// Seconds between GC sweeps
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Size of each pooled receive buffer in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Number of receive buffers retained by the pool
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            stream_ttl_hours: default_stream_ttl_hours(),
            gc_interval_secs: default_gc_interval_secs(),
            buffer_size: default_buffer_size(),
            pool_capacity: default_pool_capacity(),
        }
    }
}

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Output format for the log file.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

const fn default_true() -> bool {
    true
}

fn default_log_file_path() -> String {
    "logs/svault.log".to_string()
}

/// Logging configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub console_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default = "default_log_file_path")]
    pub file_path: String,
    #[serde(default)]
    pub file_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            console_level: LogLevel::default(),
            file_enable: false,
            file_level: LogLevel::default(),
            file_path: default_log_file_path(),
            file_format: LogFormat::default(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// OTLP endpoint for metric export; metrics stay local when unset.
    pub otlp_endpoint: Option<String>,
    #[serde(default)]
    pub otlp_headers: HashMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enable: true, otlp_endpoint: None, otlp_headers: HashMap::new() }
    }
}

/// Top-level server configuration.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Result of loading configuration, tracking whether the file was found.
pub struct ConfigLoadResult {
    pub config: Config,
    pub file_missing: Option<String>,
}

/// Load configuration: defaults, then the TOML file (if present), then
/// `SV_`-prefixed environment variables.
///
/// # Errors
///
/// Returns an error if the file or environment contain values that fail to
/// deserialize into [`Config`].
pub fn load(config_path: &str) -> Result<ConfigLoadResult, Box<figment::Error>> {
    let mut figment =
        Figment::new().merge(figment::providers::Serialized::defaults(Config::default()));

    let mut file_missing = None;

    // Try to load the config file, but don't fail if it doesn't exist
    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let config: Config =
        figment.merge(Env::prefixed("SV_").split("__")).extract().map_err(Box::new)?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Serialize the default configuration as TOML.
///
/// # Errors
///
/// Returns an error if TOML serialization fails.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&Config::default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.ws_path, "/audio");
        assert_eq!(config.cache.directory, "cache");
        assert_eq!(config.cache.stream_ttl_hours, 24);
        assert_eq!(config.cache.buffer_size, 64 * 1024);
        assert_eq!(config.cache.pool_capacity, 100);
    }

    #[test]
    fn toml_overrides_defaults() {
        let figment = Figment::new()
            .merge(figment::providers::Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                [server]
                port = 9999
                ws_path = "/cache"

                [cache]
                directory = "/tmp/vault"
                "#,
            ));
        let config: Config = figment.extract().unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.ws_path, "/cache");
        assert_eq!(config.cache.directory, "/tmp/vault");
        // Untouched sections keep their defaults.
        assert_eq!(config.cache.pool_capacity, 100);
        assert!(config.log.console_enable);
    }

    #[test]
    fn default_config_serializes_to_toml() {
        let toml_string = generate_default().unwrap();
        assert!(toml_string.contains("[server]"));
        assert!(toml_string.contains("[cache]"));
        let round_trip: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(round_trip.server.port, 8080);
    }
}
