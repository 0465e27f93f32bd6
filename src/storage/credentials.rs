//! Storage credentials
//!
//! Static keys from configuration take precedence; when none are configured
//! the AWS default provider chain (environment, profile, instance metadata)
//! is used.
//!
//! # Example
//!
//! ```
//! use video_uploadr::config::StorageConfig;
//! use video_uploadr::storage::credentials::CredentialSource;
//!
//! let config = StorageConfig {
//!     access_key: Some("access-key".into()),
//!     secret_key: Some("secret-key".into()),
//!     ..Default::default()
//! };
//! assert!(matches!(
//!     CredentialSource::from_config(&config),
//!     Ok(CredentialSource::Static(_))
//! ));
//! ```

use crate::config::StorageConfig;
use aws_credential_types::Credentials;
use thiserror::Error;

/// Provider name reported by the SDK for configured keys
const PROVIDER_NAME: &str = "video-uploadr-config";

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Incomplete credentials: {0}")]
    Incomplete(String),
}

/// Where S3 credentials come from
#[derive(Debug, Clone)]
pub enum CredentialSource {
    Static(Credentials),
    DefaultChain,
}

impl CredentialSource {
    /// Resolve the credential source for a storage configuration
    ///
    /// Setting only one of `access_key` / `secret_key` is an error rather than
    /// a silent fall back to the default chain.
    pub fn from_config(config: &StorageConfig) -> Result<Self, CredentialsError> {
        match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => Ok(CredentialSource::Static(
                Credentials::new(access_key, secret_key, None, None, PROVIDER_NAME),
            )),
            (None, None) => Ok(CredentialSource::DefaultChain),
            (Some(_), None) => Err(CredentialsError::Incomplete(
                "access_key set without secret_key".into(),
            )),
            (None, Some(_)) => Err(CredentialsError::Incomplete(
                "secret_key set without access_key".into(),
            )),
        }
    }
}
