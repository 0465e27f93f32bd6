//! Video Uploadr Library
//!
//! Streaming video upload service: accepts a `multipart/form-data` POST,
//! checks that the file is a video within the size limit, and streams it into
//! S3-compatible object storage without touching local disk.
//!
//! # Features
//!
//! - **Streaming**: bounded memory per upload, backpressure from storage to client
//! - **Early rejection**: content type checked before the payload is read
//! - **Size ceiling**: enforced while streaming, oversize uploads leave no object
//! - **S3 Compatible**: AWS S3, MinIO, RustFS, LocalStack and friends
//!
//! # Example
//!
//! ```no_run
//! use video_uploadr::{config::Config, server::Server, storage::build_sink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let sink = build_sink(&config).await?;
//!     let server = Server::bind(&config, sink).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod router;
pub mod server;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;
pub use storage::{build_sink, StorageSink};
pub use upload::{ErrorKind, UploadError, UploadHandler};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
