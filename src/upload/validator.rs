//! Stream validation
//!
//! Gates an upload body on its declared content type and on a byte ceiling
//! while it streams through. Nothing is buffered here: every chunk is
//! forwarded as soon as it has been counted.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use futures::{stream, StreamExt};
//! use std::time::Duration;
//! use video_uploadr::upload::{StreamValidator, UploadError};
//!
//! # async fn example() -> Result<(), UploadError> {
//! let validator = StreamValidator::new(1024, Duration::from_secs(30));
//! validator.check_content_type(Some("video/mp4")).into_result()?;
//!
//! let body = stream::iter(vec![Ok::<_, UploadError>(Bytes::from_static(b"frame"))]);
//! let mut gated = Box::pin(validator.gate(body));
//! while let Some(chunk) = gated.next().await {
//!     let _chunk = chunk?;
//! }
//! # Ok(())
//! # }
//! ```

use super::UploadError;
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, Sleep};

/// Required prefix of the declared content type
pub const VIDEO_MIME_PREFIX: &str = "video/";

/// Why an upload was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    #[error("invalid file type '{declared}': only video/* files are accepted")]
    NotVideo { declared: String },

    #[error("file too large: limit is {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Result of validating an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected { reason: RejectionReason },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }

    pub fn into_result(self) -> Result<(), UploadError> {
        match self {
            ValidationOutcome::Accepted => Ok(()),
            ValidationOutcome::Rejected { reason } => Err(reason.into()),
        }
    }
}

/// Content type and size gate for one upload
#[derive(Debug, Clone)]
pub struct StreamValidator {
    max_bytes: u64,
    idle_timeout: Duration,
}

impl StreamValidator {
    pub fn new(max_bytes: u64, idle_timeout: Duration) -> Self {
        Self {
            max_bytes,
            idle_timeout,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Check the declared MIME type before any payload is consumed
    ///
    /// A part without a declared type is rejected.
    pub fn check_content_type(&self, declared: Option<&str>) -> ValidationOutcome {
        match declared {
            Some(mime) if mime.trim().to_ascii_lowercase().starts_with(VIDEO_MIME_PREFIX) => {
                ValidationOutcome::Accepted
            }
            other => ValidationOutcome::Rejected {
                reason: RejectionReason::NotVideo {
                    declared: other.unwrap_or("none").to_string(),
                },
            },
        }
    }

    /// Wrap a byte stream with the size ceiling and idle-read timeout
    pub fn gate<S, E>(&self, inner: S) -> ValidatedStream<S>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<UploadError>,
    {
        ValidatedStream {
            inner,
            limit: self.max_bytes,
            received: 0,
            idle_timeout: self.idle_timeout,
            idle: tokio::time::sleep(self.idle_timeout),
            waiting: false,
            finished: false,
        }
    }
}

pin_project! {
    /// Byte stream that stops at the first chunk crossing the size limit
    ///
    /// The offending chunk is never forwarded; the stream yields a single
    /// `TooLarge` error and then ends without polling the source again, so no
    /// further bytes are read off the wire.
    ///
    /// The idle window only runs while the source is pending. Time the
    /// consumer spends between polls is not counted against the client.
    pub struct ValidatedStream<S> {
        #[pin]
        inner: S,
        limit: u64,
        received: u64,
        idle_timeout: Duration,
        #[pin]
        idle: Sleep,
        waiting: bool,
        finished: bool,
    }
}

impl<S> ValidatedStream<S> {
    /// Bytes forwarded so far
    pub fn bytes_received(&self) -> u64 {
        self.received
    }
}

impl<S, E> Stream for ValidatedStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<UploadError>,
{
    type Item = Result<Bytes, UploadError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let received = *this.received + chunk.len() as u64;
                if received > *this.limit {
                    *this.finished = true;
                    tracing::warn!(
                        limit = *this.limit,
                        received = received,
                        "Upload exceeded size limit"
                    );
                    return Poll::Ready(Some(Err(RejectionReason::TooLarge {
                        limit: *this.limit,
                    }
                    .into())));
                }
                *this.received = received;
                *this.waiting = false;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                *this.finished = true;
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                if !*this.waiting {
                    *this.waiting = true;
                    this.idle
                        .as_mut()
                        .reset(Instant::now() + *this.idle_timeout);
                }
                if this.idle.poll(cx).is_ready() {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(UploadError::IdleTimeout(*this.idle_timeout))));
                }
                Poll::Pending
            }
        }
    }
}
