//! Upload request handler
//!
//! Drives one `multipart/form-data` body through the pipeline:
//!
//! 1. Find the configured file field, skipping any fields before it
//! 2. Reject non-video content types before reading the payload
//! 3. Derive the storage key from the client filename
//! 4. Stream the payload through the size and idle-time gate into the sink
//!
//! Nothing is written to local disk and at most one read chunk (plus the
//! sink's own part buffer) is held in memory at a time.

use super::key::{KeyDeriver, FALLBACK_FILENAME};
use super::validator::StreamValidator;
use super::{UploadError, UploadResult, UploadedVideo};
use crate::config::UploadConfig;
use crate::storage::StorageSink;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use multer::{Field, Multipart};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handles video upload requests
pub struct UploadHandler {
    field_name: String,
    validator: StreamValidator,
    keys: KeyDeriver,
    sink: Arc<dyn StorageSink>,
}

impl UploadHandler {
    pub fn new(config: &UploadConfig, idle_timeout: Duration, sink: Arc<dyn StorageSink>) -> Self {
        Self {
            field_name: config.field_name.clone(),
            validator: StreamValidator::new(config.max_size, idle_timeout),
            keys: KeyDeriver::new(config.key_prefix.clone(), config.key_strategy),
            sink,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn sink(&self) -> &Arc<dyn StorageSink> {
        &self.sink
    }

    /// Handle one upload body
    ///
    /// `content_type` is the request's `Content-Type` header, which must carry
    /// the multipart boundary.
    #[tracing::instrument(
        name = "upload.handle",
        skip(self, body),
        fields(
            upload.field = %self.field_name,
            upload.filename = tracing::field::Empty,
            upload.key = tracing::field::Empty,
            upload.bytes = tracing::field::Empty
        )
    )]
    pub async fn handle<B, E>(&self, content_type: Option<&str>, body: B) -> UploadResult
    where
        B: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let start = Instant::now();

        let result = self.process(content_type, body).await;

        let duration = start.elapsed();
        match &result {
            Ok(video) => {
                tracing::info!(
                    key = %video.key,
                    bytes = video.bytes_written,
                    duration_ms = duration.as_millis(),
                    "Video uploaded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    kind = e.kind().as_str(),
                    error = %e,
                    duration_ms = duration.as_millis(),
                    "Upload failed"
                );
            }
        }

        result
    }

    async fn process<B, E>(&self, content_type: Option<&str>, body: B) -> UploadResult
    where
        B: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let content_type = content_type
            .ok_or_else(|| UploadError::Malformed("missing Content-Type header".to_string()))?;
        let boundary = multer::parse_boundary(content_type)?;

        let mut multipart = Multipart::new(body, boundary);
        let field = self.next_file_field(&mut multipart).await?;

        let declared = field.content_type().map(|mime| mime.to_string());
        self.validator
            .check_content_type(declared.as_deref())
            .into_result()?;

        let filename = field.file_name().unwrap_or(FALLBACK_FILENAME).to_string();
        let key = self.keys.derive_now(&filename);

        let span = tracing::Span::current();
        span.record("upload.filename", filename.as_str());
        span.record("upload.key", key.as_str());

        let mime = declared.unwrap_or_default();
        let stored = self
            .sink
            .put(self.validator.gate(field).boxed(), key.as_str(), &mime)
            .await?;

        span.record("upload.bytes", stored.bytes_written);

        Ok(UploadedVideo {
            key: stored.key,
            url: stored.url,
            bytes_written: stored.bytes_written,
        })
    }

    /// Advance to the file field, dropping any other fields on the way
    async fn next_file_field(
        &self,
        multipart: &mut Multipart<'static>,
    ) -> Result<Field<'static>, UploadError> {
        let idle = self.validator.idle_timeout();

        loop {
            let next = tokio::time::timeout(idle, multipart.next_field())
                .await
                .map_err(|_| UploadError::IdleTimeout(idle))??;

            match next {
                Some(field) if field.name() == Some(self.field_name.as_str()) => return Ok(field),
                Some(field) => {
                    tracing::debug!(field = ?field.name(), "Skipping multipart field");
                }
                None => return Err(UploadError::MissingField(self.field_name.clone())),
            }
        }
    }
}

impl std::fmt::Debug for UploadHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadHandler")
            .field("field_name", &self.field_name)
            .field("validator", &self.validator)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}
