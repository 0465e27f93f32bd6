//! HTTP server module
//!
//! Accepts connections, serves them with hyper over HTTP/1.1 and shuts down
//! gracefully: on the shutdown signal the listener closes, in-flight requests
//! get [`SHUTDOWN_GRACE_PERIOD`] to finish, and whatever is still running
//! after that is dropped (which aborts any open storage write).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use video_uploadr::config::Config;
//! use video_uploadr::server::Server;
//! use video_uploadr::storage::MemorySink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let server = Server::bind(&config, Arc::new(MemorySink::new("local"))).await?;
//! println!("listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod response;

use crate::config::Config;
use crate::storage::StorageSink;
use crate::upload::UploadHandler;
use self::http::AppState;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::{debug, error, info, warn};

/// How long in-flight requests may run after the shutdown signal
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),
}

/// HTTP Server
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    header_timeout: Duration,
    state: Arc<AppState>,
}

impl Server {
    /// Bind the configured address and prepare the upload pipeline
    ///
    /// Port 0 binds an OS-assigned port; see [`Server::local_addr`].
    pub async fn bind(config: &Config, sink: Arc<dyn StorageSink>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.server.address.as_str())
            .await
            .map_err(|e| {
                ServerError::BindError(format!("{}: {}", config.server.address, e))
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        let idle_timeout = config.server.idle_timeout();
        let upload = UploadHandler::new(&config.upload, idle_timeout, sink);

        info!(
            address = %local_addr,
            max_upload_bytes = config.upload.max_size,
            field = %config.upload.field_name,
            idle_timeout_secs = idle_timeout.as_secs(),
            "Server bound"
        );

        Ok(Self {
            listener,
            local_addr,
            header_timeout: idle_timeout,
            state: Arc::new(AppState::new(upload)),
        })
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` completes
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let graceful = GracefulShutdown::new();

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(self.header_timeout);

        info!("Accepting connections on {}", self.local_addr);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let state = Arc::clone(&self.state);
                    let service = ServiceBuilder::new()
                        .layer(self::http::cors_layer())
                        .service_fn(move |req: Request<Incoming>| {
                            self::http::handle_request(req, Arc::clone(&state))
                        });

                    let conn = builder.serve_connection(
                        TokioIo::new(stream),
                        TowerToHyperService::new(service),
                    );
                    let conn = graceful.watch(conn);

                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            debug!(peer = %peer_addr, error = %e, "Connection ended with error");
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        drop(self.listener);

        tokio::select! {
            _ = graceful.shutdown() => {
                info!("All connections closed");
            }
            _ = tokio::time::sleep(SHUTDOWN_GRACE_PERIOD) => {
                warn!(
                    grace_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
                    "Grace period elapsed, dropping remaining connections"
                );
            }
        }

        Ok(())
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
