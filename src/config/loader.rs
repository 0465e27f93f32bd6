//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError, StorageConfig};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` placeholders
    pub fn from_yaml(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from flat environment variables
    ///
    /// Recognized variables: `HOST`, `PORT`, `UPLOAD_IDLE_TIMEOUT_SECS`,
    /// `STORAGE_BACKEND`, `AWS_BUCKET_NAME`, `AWS_REGION`, `AWS_ENDPOINT_URL`,
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `PUBLIC_URL_BASE`,
    /// `STORAGE_MAX_ATTEMPTS`, `MAX_UPLOAD_SIZE`, `KEY_STRATEGY`, `LOG_FORMAT`.
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut config = Config {
            server: Default::default(),
            storage: StorageConfig::default(),
            upload: Default::default(),
            logging: Default::default(),
        };

        if var("HOST").is_some() || var("PORT").is_some() {
            let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
            let port: u16 = parse_var(&var, "PORT")?.unwrap_or(3001);
            config.server.address = format!("{}:{}", host, port);
        }
        if let Some(secs) = parse_var(&var, "UPLOAD_IDLE_TIMEOUT_SECS")? {
            config.server.idle_timeout_secs = secs;
        }

        if let Some(backend) = parse_var(&var, "STORAGE_BACKEND")? {
            config.storage.backend = backend;
        }
        if let Some(bucket) = var("AWS_BUCKET_NAME") {
            config.storage.bucket = bucket;
        }
        if let Some(region) = var("AWS_REGION") {
            config.storage.region = region;
        }
        config.storage.endpoint = var("AWS_ENDPOINT_URL");
        config.storage.access_key = var("AWS_ACCESS_KEY_ID");
        config.storage.secret_key = var("AWS_SECRET_ACCESS_KEY");
        config.storage.public_url_base = var("PUBLIC_URL_BASE");
        if let Some(attempts) = parse_var(&var, "STORAGE_MAX_ATTEMPTS")? {
            config.storage.max_attempts = attempts;
        }

        if let Some(max_size) = parse_var(&var, "MAX_UPLOAD_SIZE")? {
            config.upload.max_size = max_size;
        }
        if let Some(strategy) = parse_var(&var, "KEY_STRATEGY")? {
            config.upload.key_strategy = strategy;
        }

        if let Some(level) = var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = parse_var(&var, "LOG_FORMAT")? {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(var: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::EnvError {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
