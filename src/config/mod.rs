//! Configuration module for Video Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion, plus a flat environment-variable mode for
//! container deployments. Configuration is validated once at startup and then
//! shared immutably.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = env_var_pattern();
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

fn env_var_pattern() -> &'static regex_lite::Regex {
    static PATTERN: std::sync::OnceLock<regex_lite::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}")
            .expect("env var pattern is a valid regex")
    })
}

/// Custom deserializer for strings with environment variable expansion.
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

/// Same as [`deserialize_with_env`] for optional values. An expansion that
/// yields an empty string or an unresolved placeholder is treated as unset.
fn deserialize_optional_with_env<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| expand_env_vars(&s))
        .filter(|s| !s.is_empty() && !s.starts_with("${")))
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {reason}")]
    EnvError { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        ConfigLoader::from_env()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.address cannot be empty".into(),
            ));
        }

        if self.server.idle_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "server.idle_timeout_secs must be greater than zero".into(),
            ));
        }

        if self.upload.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_size must be greater than zero".into(),
            ));
        }

        if self.upload.field_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "upload.field_name cannot be empty".into(),
            ));
        }

        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.bucket is required for the s3 backend".into(),
            ));
        }

        if self.storage.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "storage.max_attempts must be at least 1".into(),
            ));
        }

        if let Some(ref endpoint) = self.storage.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(
                    "Invalid storage endpoint: must start with http:// or https://".into(),
                ));
            }
        }

        if let Some(ref base) = self.storage.public_url_base {
            if !is_valid_http_url(base) {
                return Err(ConfigError::ValidationError(
                    "Invalid public_url_base: must start with http:// or https://".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address", deserialize_with = "deserialize_with_env")]
    pub address: String,
    /// Longest silence tolerated while reading an upload body
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_idle_timeout() -> u64 {
    30
}

/// Which object store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    /// Process-local store for development and tests
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Object storage configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default, deserialize_with = "deserialize_with_env")]
    pub bucket: String,
    #[serde(default = "default_region", deserialize_with = "deserialize_with_env")]
    pub region: String,
    #[serde(default, deserialize_with = "deserialize_optional_with_env")]
    pub endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_with_env")]
    pub access_key: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_with_env")]
    pub secret_key: Option<String>,
    /// Base URL used to build `fileUrl` instead of the bucket URL (e.g. a CDN)
    #[serde(default, deserialize_with = "deserialize_optional_with_env")]
    pub public_url_base: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            public_url_base: None,
            max_attempts: default_max_attempts(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("public_url_base", &self.public_url_base)
            .field("max_attempts", &self.max_attempts)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_connect_timeout() -> u64 {
    5
}

/// How storage keys are made unique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// `<prefix>/<millis>-<filename>`
    #[default]
    Timestamp,
    /// `<prefix>/<millis>-<random>-<filename>`
    TimestampRandom,
}

impl std::str::FromStr for KeyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "timestamp" => Ok(Self::Timestamp),
            "timestamp_random" => Ok(Self::TimestampRandom),
            other => Err(format!("unknown key strategy '{}'", other)),
        }
    }
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Byte ceiling for a single file
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_field_name")]
    pub field_name: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub key_strategy: KeyStrategy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            field_name: default_field_name(),
            key_prefix: default_key_prefix(),
            key_strategy: KeyStrategy::default(),
        }
    }
}

fn default_max_size() -> u64 {
    104857600 // 100MB
}

fn default_field_name() -> String {
    "video".to_string()
}

fn default_key_prefix() -> String {
    "videos".to_string()
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration
///
/// `RUST_LOG`, when set, takes precedence over `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
