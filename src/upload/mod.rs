//! Upload module
//!
//! The request-side pipeline: multipart decoding, content validation, size
//! enforcement and storage-key derivation, handed off to a
//! [`StorageSink`](crate::storage::StorageSink).
//!
//! Every failure is an [`UploadError`]; [`UploadError::kind`] places it in the
//! error taxonomy and [`ErrorKind::status_code`] is the single place where that
//! taxonomy turns into HTTP status codes.

use crate::storage::StorageError;
use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

pub mod handler;
pub mod key;
pub mod validator;

pub use handler::UploadHandler;
pub use key::{derive_key, sanitize_filename, KeyDeriver, StorageKey};
pub use validator::{RejectionReason, StreamValidator, ValidatedStream, ValidationOutcome};

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("missing {0} field")]
    MissingField(String),

    #[error("{0}")]
    Rejected(#[from] RejectionReason),

    #[error("malformed multipart body: {0}")]
    Malformed(String),

    #[error("no upload data received for {}s", .0.as_secs())]
    IdleTimeout(Duration),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Error taxonomy shared by every stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing field, wrong content type, oversize file
    ClientInput,
    /// Body is not a decodable multipart stream
    ProtocolDecoding,
    /// Client stopped sending mid-upload
    ClientTimeout,
    /// Object store unreachable, refused, or over quota
    StorageTransport,
}

impl ErrorKind {
    /// HTTP status code for this kind of failure
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::ClientInput | ErrorKind::ProtocolDecoding => StatusCode::BAD_REQUEST,
            ErrorKind::ClientTimeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::StorageTransport => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used as the `error` field of JSON error bodies
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::ClientInput => "Invalid upload",
            ErrorKind::ProtocolDecoding => "Malformed request",
            ErrorKind::ClientTimeout => "Upload timed out",
            ErrorKind::StorageTransport => "Error uploading video",
        }
    }

    /// Name for log fields
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ClientInput => "client_input",
            ErrorKind::ProtocolDecoding => "protocol_decoding",
            ErrorKind::ClientTimeout => "client_timeout",
            ErrorKind::StorageTransport => "storage_transport",
        }
    }
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::MissingField(_) | UploadError::Rejected(_) => ErrorKind::ClientInput,
            UploadError::Malformed(_) => ErrorKind::ProtocolDecoding,
            UploadError::IdleTimeout(_) => ErrorKind::ClientTimeout,
            UploadError::Storage(_) => ErrorKind::StorageTransport,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// Message that is safe to return to the client
    ///
    /// Storage failures collapse to a fixed sentence per failure kind so that
    /// endpoints, bucket names and SDK diagnostics never reach the response.
    pub fn public_details(&self) -> String {
        match self {
            UploadError::Storage(e) => e.kind().public_message().to_string(),
            other => other.to_string(),
        }
    }
}

impl From<multer::Error> for UploadError {
    fn from(err: multer::Error) -> Self {
        UploadError::Malformed(err.to_string())
    }
}

/// A video that was written to storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedVideo {
    pub key: String,
    pub url: String,
    pub bytes_written: u64,
}

/// Outcome of one upload request
pub type UploadResult = Result<UploadedVideo, UploadError>;
