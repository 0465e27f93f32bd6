//! In-process object store
//!
//! Objects are published only once their stream has ended cleanly, which
//! gives the same all-or-nothing visibility as an S3 multipart commit.

use super::{ByteStream, StorageSink, StoredObject};
use crate::upload::UploadError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;

/// Stored object contents
#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub content_type: String,
    pub data: Bytes,
}

/// Memory-backed [`StorageSink`]
///
/// Clones share the same object map.
#[derive(Debug, Clone)]
pub struct MemorySink {
    bucket: String,
    objects: Arc<DashMap<String, MemoryObject>>,
}

impl MemorySink {
    pub fn new(bucket: &str) -> Self {
        let bucket = if bucket.trim().is_empty() {
            "local".to_string()
        } else {
            bucket.to_string()
        };
        Self {
            bucket,
            objects: Arc::new(DashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<MemoryObject> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[async_trait]
impl StorageSink for MemorySink {
    #[tracing::instrument(
        name = "storage.memory.put",
        skip(self, body),
        fields(storage.key = %key, storage.bytes = tracing::field::Empty)
    )]
    async fn put(
        &self,
        mut body: ByteStream,
        key: &str,
        content_type: &str,
    ) -> Result<StoredObject, UploadError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        let data = buffer.freeze();
        let bytes_written = data.len() as u64;
        tracing::Span::current().record("storage.bytes", bytes_written);

        self.objects.insert(
            key.to_string(),
            MemoryObject {
                content_type: content_type.to_string(),
                data,
            },
        );

        tracing::debug!(bytes = bytes_written, "Object committed to memory store");

        Ok(StoredObject {
            key: key.to_string(),
            url: self.object_url(key),
            bytes_written,
            etag: None,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("memory://{}/{}", self.bucket, key)
    }
}
