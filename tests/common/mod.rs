//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use video_uploadr::config::{
    Config, LoggingConfig, ServerConfig, StorageBackend, StorageConfig, UploadConfig,
};
use video_uploadr::server::Server;
use video_uploadr::storage::{
    ByteStream, StorageError, StorageFailureKind, StorageSink, StoredObject,
};
use video_uploadr::upload::UploadError;

pub const BOUNDARY: &str = "video-uploadr-test-boundary";

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

/// One form part
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn file(name: &'a str, filename: &'a str, content_type: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            filename: Some(filename),
            content_type: Some(content_type),
            data,
        }
    }

    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            data: value.as_bytes(),
        }
    }
}

/// Encode parts as a `multipart/form-data` body using [`BOUNDARY`]
pub fn multipart_body(parts: &[Part<'_>]) -> Bytes {
    let mut body = BytesMut::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body.freeze()
}

/// Split a body into fixed-size chunks as a client would send it
///
/// The stream is pending once between chunks, like a socket that has drained
/// its receive buffer, so readers cannot pull the whole body in one poll.
pub fn chunked(
    body: Bytes,
    chunk_size: usize,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let chunks: Vec<Bytes> = body
        .chunks(chunk_size)
        .map(Bytes::copy_from_slice)
        .collect();
    futures::stream::iter(chunks).then(|chunk| async move {
        tokio::task::yield_now().await;
        Ok::<_, std::io::Error>(chunk)
    })
}

/// Sink that reads a little of the body and then fails
pub struct FailingSink {
    kind: StorageFailureKind,
    message: String,
    pub calls: AtomicUsize,
}

impl FailingSink {
    pub fn new(kind: StorageFailureKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageSink for FailingSink {
    async fn put(
        &self,
        mut body: ByteStream,
        _key: &str,
        _content_type: &str,
    ) -> Result<StoredObject, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(chunk) = body.next().await {
            chunk?;
        }
        Err(StorageError::new(self.kind, self.message.clone()).into())
    }

    fn object_url(&self, key: &str) -> String {
        format!("failing://{}", key)
    }
}

pub fn test_config(upload: UploadConfig) -> Config {
    Config {
        server: ServerConfig {
            address: "127.0.0.1:0".into(),
            idle_timeout_secs: 5,
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            bucket: "test".into(),
            ..Default::default()
        },
        upload,
        logging: LoggingConfig::default(),
    }
}

/// A server running on an OS-assigned port
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(sink: Arc<dyn StorageSink>, upload: UploadConfig) -> Self {
        let config = test_config(upload);
        let server = Server::bind(&config, sink).await.expect("bind test server");
        let addr = server.local_addr();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = rx.await;
                })
                .await
                .expect("server run");
        });

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), &mut self.handle).await;
    }
}
