//! S3 storage backend
//!
//! Streams upload bodies into S3 (or any S3-compatible store) without holding
//! more than one part in memory.
//!
//! # Write strategy
//!
//! | Body size | Requests |
//! |-----------|----------|
//! | up to one part | `PutObject` |
//! | larger | `CreateMultipartUpload`, `UploadPart` x N, `CompleteMultipartUpload` |
//!
//! Parts are uploaded one at a time and the next part is only read from the
//! body once the previous one has been accepted, so a slow store slows down
//! the network read. Any failure, including one raised by the body stream,
//! ends in `AbortMultipartUpload`; S3 never exposes an object whose multipart
//! upload was not completed. If the future is dropped mid-upload the abort is
//! spawned from [`AbortOnDrop`].
//!
//! # Example
//!
//! ```no_run
//! use video_uploadr::config::StorageConfig;
//! use video_uploadr::storage::{S3Sink, StorageSink};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StorageConfig {
//!     bucket: "my-videos".to_string(),
//!     region: "us-east-1".to_string(),
//!     ..Default::default()
//! };
//! let sink = S3Sink::new(&config).await?;
//! println!("{}", sink.object_url("videos/1700000000000-clip.mp4"));
//! # Ok(())
//! # }
//! ```

use super::credentials::CredentialSource;
use super::{ByteStream, StorageError, StorageFailureKind, StorageSink, StoredObject};
use crate::config::StorageConfig;
use crate::upload::UploadError;
use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum part size (5MB) - S3 requirement
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// User metadata key recording the form field a file arrived in
pub const FIELD_NAME_METADATA: &str = "fieldName";

/// Characters escaped when a key is placed in a URL path
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// S3-backed [`StorageSink`]
#[derive(Debug, Clone)]
pub struct S3Sink {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    public_url_base: Option<String>,
    part_size: usize,
    metadata: HashMap<String, String>,
}

impl S3Sink {
    /// Create a sink from storage configuration
    ///
    /// Custom endpoints (MinIO, RustFS, LocalStack, ...) are addressed
    /// path-style.
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let source = CredentialSource::from_config(config)
            .map_err(|e| StorageError::new(StorageFailureKind::Permission, e.to_string()))?;

        let region = Region::new(config.region.clone());

        let mut builder = match source {
            CredentialSource::Static(credentials) => aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(credentials),
            CredentialSource::DefaultChain => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region.clone())
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder
            .region(region)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts))
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                    .build(),
            );

        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "S3 storage configured"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            public_url_base: config.public_url_base.clone(),
            part_size: MIN_PART_SIZE,
            metadata: HashMap::new(),
        })
    }

    /// Override the multipart part size (never below [`MIN_PART_SIZE`])
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = std::cmp::max(part_size, MIN_PART_SIZE);
        self
    }

    /// Attach a user metadata entry (`x-amz-meta-*`) to every stored object
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    fn object_metadata(&self) -> Option<HashMap<String, String>> {
        (!self.metadata.is_empty()).then(|| self.metadata.clone())
    }

    async fn put_single(
        &self,
        data: Bytes,
        key: &str,
        content_type: &str,
    ) -> Result<(Option<String>, u64), UploadError> {
        let size = data.len() as u64;

        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(self.object_metadata())
            .content_length(size as i64)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| storage_error("PutObject", e))?;

        Ok((output.e_tag().map(String::from), size))
    }

    async fn put_multipart(
        &self,
        mut body: ByteStream,
        first_part: BytesMut,
        key: &str,
        content_type: &str,
    ) -> Result<(Option<String>, u64), UploadError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(self.object_metadata())
            .send()
            .await
            .map_err(|e| storage_error("CreateMultipartUpload", e))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::unknown("CreateMultipartUpload returned no upload ID"))?
            .to_string();

        tracing::debug!(upload_id = %upload_id, "Multipart upload created");

        let guard = AbortOnDrop::new(&self.client, &self.bucket, key, &upload_id);

        let result = match self
            .upload_parts(&mut body, first_part, key, &upload_id)
            .await
        {
            Ok((parts, total)) => self
                .complete(key, &upload_id, parts)
                .await
                .map(|etag| (etag, total)),
            Err(e) => Err(e),
        };

        // Armed until the abort has finished
        if result.is_err() {
            self.abort(key, &upload_id).await;
        }
        guard.disarm();

        result
    }

    async fn upload_parts(
        &self,
        body: &mut ByteStream,
        mut buffer: BytesMut,
        key: &str,
        upload_id: &str,
    ) -> Result<(Vec<CompletedPart>, u64), UploadError> {
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;
        let mut total: u64 = 0;
        let mut more = true;

        loop {
            if !buffer.is_empty() {
                let data = buffer.split().freeze();
                let len = data.len();

                let output = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .content_length(len as i64)
                    .body(S3Body::from(data))
                    .send()
                    .await
                    .map_err(|e| storage_error("UploadPart", e))?;

                let etag = output.e_tag().ok_or_else(|| {
                    StorageError::unknown(format!("UploadPart {} returned no ETag", part_number))
                })?;

                parts.push(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .e_tag(etag)
                        .build(),
                );

                tracing::debug!(part_number = part_number, bytes = len, "Uploaded part");

                total += len as u64;
                part_number += 1;
            }

            if !more {
                break;
            }
            more = fill_part(body, &mut buffer, self.part_size).await?;
        }

        Ok((parts, total))
    }

    async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<Option<String>, UploadError> {
        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| storage_error("CompleteMultipartUpload", e))?;

        Ok(output.e_tag().map(String::from))
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        match self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => tracing::info!(upload_id = %upload_id, "Aborted multipart upload"),
            Err(e) => tracing::warn!(
                upload_id = %upload_id,
                error = %DisplayErrorContext(e),
                "Failed to abort multipart upload"
            ),
        }
    }
}

#[async_trait]
impl StorageSink for S3Sink {
    #[tracing::instrument(
        name = "storage.s3.put",
        skip(self, body),
        fields(
            s3.bucket = %self.bucket,
            s3.key = %key,
            http.content_type = %content_type,
            upload.bytes = tracing::field::Empty,
            s3.etag = tracing::field::Empty
        )
    )]
    async fn put(
        &self,
        mut body: ByteStream,
        key: &str,
        content_type: &str,
    ) -> Result<StoredObject, UploadError> {
        let start = Instant::now();
        let mut buffer = BytesMut::with_capacity(self.part_size);

        let result = match fill_part(&mut body, &mut buffer, self.part_size).await {
            Ok(true) => self.put_multipart(body, buffer, key, content_type).await,
            Ok(false) => self.put_single(buffer.freeze(), key, content_type).await,
            Err(e) => Err(e),
        };

        let duration = start.elapsed();

        match result {
            Ok((etag, bytes_written)) => {
                let span = tracing::Span::current();
                span.record("upload.bytes", bytes_written);
                if let Some(ref etag) = etag {
                    span.record("s3.etag", etag.as_str());
                }

                tracing::info!(
                    bytes_written = bytes_written,
                    duration_ms = duration.as_millis(),
                    "S3 upload completed"
                );

                Ok(StoredObject {
                    key: key.to_string(),
                    url: self.object_url(key),
                    bytes_written,
                    etag,
                })
            }
            Err(e) => {
                match &e {
                    UploadError::Storage(storage) => tracing::error!(
                        kind = %storage.kind(),
                        error = %storage.message(),
                        duration_ms = duration.as_millis(),
                        "S3 upload failed"
                    ),
                    other => tracing::warn!(
                        error = %other,
                        duration_ms = duration.as_millis(),
                        "S3 upload cancelled by source stream"
                    ),
                }
                Err(e)
            }
        }
    }

    fn object_url(&self, key: &str) -> String {
        let encoded = utf8_percent_encode(key, KEY_ENCODE_SET);

        if let Some(ref base) = self.public_url_base {
            format!("{}/{}", base.trim_end_matches('/'), encoded)
        } else if let Some(ref endpoint) = self.endpoint {
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, encoded)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, encoded
            )
        }
    }
}

/// Read from `body` until `buffer` holds at least `part_size` bytes
///
/// Returns `true` when the part is full and the body may have more data,
/// `false` once the body has ended.
async fn fill_part(
    body: &mut ByteStream,
    buffer: &mut BytesMut,
    part_size: usize,
) -> Result<bool, UploadError> {
    while buffer.len() < part_size {
        match body.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => return Ok(false),
        }
    }
    Ok(true)
}

/// Spawns `AbortMultipartUpload` if dropped while armed
struct AbortOnDrop {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl AbortOnDrop {
    fn new(client: &Client, bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            client: client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                upload_id = %self.upload_id,
                "No runtime to abort dropped multipart upload"
            );
            return;
        };

        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);

        tracing::warn!(upload_id = %upload_id, "Upload dropped mid-transfer, aborting");

        handle.spawn(async move {
            if let Err(e) = client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                tracing::warn!(
                    upload_id = %upload_id,
                    error = %DisplayErrorContext(e),
                    "Failed to abort dropped multipart upload"
                );
            }
        });
    }
}

fn storage_error<E, R>(operation: &str, err: SdkError<E, R>) -> UploadError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let kind = match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            StorageFailureKind::Connectivity
        }
        SdkError::ServiceError(service) => classify_service_code(service.err().code()),
        _ => StorageFailureKind::Unknown,
    };

    StorageError::new(kind, format!("{}: {}", operation, DisplayErrorContext(err))).into()
}

/// Map an S3 error code to a failure kind
pub fn classify_service_code(code: Option<&str>) -> StorageFailureKind {
    match code {
        Some(
            "AccessDenied"
            | "AllAccessDisabled"
            | "AccountProblem"
            | "ExpiredToken"
            | "InvalidAccessKeyId"
            | "InvalidToken"
            | "SignatureDoesNotMatch",
        ) => StorageFailureKind::Permission,
        Some(
            "EntityTooLarge"
            | "QuotaExceeded"
            | "ServiceQuotaExceeded"
            | "SlowDown"
            | "TooManyParts"
            | "XMinioStorageFull",
        ) => StorageFailureKind::Quota,
        Some("InternalError" | "RequestTimeout" | "ServiceUnavailable") => {
            StorageFailureKind::Connectivity
        }
        _ => StorageFailureKind::Unknown,
    }
}
