//! Object storage module
//!
//! A [`StorageSink`] takes a byte stream, a key and a content type and either
//! commits the whole object and returns its URL, or fails without leaving
//! anything retrievable under the key.
//!
//! # Backends
//!
//! - [`S3Sink`] - AWS S3 or any S3-compatible store, via `aws-sdk-s3`
//! - [`MemorySink`] - process-local store for development and tests

use crate::config::{Config, StorageBackend};
use crate::upload::UploadError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

pub mod credentials;
pub mod memory;
pub mod s3;

pub use memory::MemorySink;
pub use s3::S3Sink;

/// Upload body as seen by a sink
///
/// Errors raised by the source (size limit, idle timeout, client disconnect)
/// arrive through the stream and must abort the write.
pub type ByteStream = BoxStream<'static, Result<Bytes, UploadError>>;

/// Category of a storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFailureKind {
    /// Store unreachable, connection dropped, or timed out
    Connectivity,
    /// Credentials rejected
    Permission,
    /// Store-side limit hit
    Quota,
    Unknown,
}

impl StorageFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageFailureKind::Connectivity => "connectivity",
            StorageFailureKind::Permission => "permission",
            StorageFailureKind::Quota => "quota",
            StorageFailureKind::Unknown => "unknown",
        }
    }

    /// Client-facing description
    pub fn public_message(self) -> &'static str {
        match self {
            StorageFailureKind::Connectivity => "Storage service is unreachable",
            StorageFailureKind::Permission => "Storage service rejected the upload credentials",
            StorageFailureKind::Quota => "Storage service limit exceeded",
            StorageFailureKind::Unknown => "Storage service failed to store the file",
        }
    }
}

impl fmt::Display for StorageFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage failure
///
/// `message` carries backend diagnostics for the logs and is never sent to
/// clients.
#[derive(Debug, Clone, thiserror::Error)]
#[error("storage {kind} failure: {message}")]
pub struct StorageError {
    kind: StorageFailureKind,
    message: String,
}

impl StorageError {
    pub fn new(kind: StorageFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(StorageFailureKind::Connectivity, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(StorageFailureKind::Unknown, message)
    }

    pub fn kind(&self) -> StorageFailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A committed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub bytes_written: u64,
    pub etag: Option<String>,
}

/// Object store write capability
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Stream `body` into the store under `key`
    ///
    /// Returns the stream's own error unchanged when the source fails, or
    /// `UploadError::Storage` when the store does. In both cases no object is
    /// visible under `key` afterwards.
    async fn put(
        &self,
        body: ByteStream,
        key: &str,
        content_type: &str,
    ) -> Result<StoredObject, UploadError>;

    /// Public URL an object stored under `key` is reachable at
    fn object_url(&self, key: &str) -> String;
}

/// Build the sink selected by configuration
///
/// S3 objects carry the upload field name as `fieldName` user metadata.
pub async fn build_sink(config: &Config) -> Result<Arc<dyn StorageSink>, StorageError> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::S3 => Ok(Arc::new(
            S3Sink::new(storage)
                .await?
                .with_metadata(s3::FIELD_NAME_METADATA, &config.upload.field_name),
        )),
        StorageBackend::Memory => Ok(Arc::new(MemorySink::new(&storage.bucket))),
    }
}
