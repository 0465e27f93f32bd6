//! Video Uploadr - streaming video upload service

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use video_uploadr::config::Config;
use video_uploadr::logging::init_logging;
use video_uploadr::{build_sink, Server};

/// Video Uploadr - stream video uploads into S3-compatible storage
#[derive(Parser, Debug)]
#[command(name = "video-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file (environment variables are used when omitted)
    #[arg(short, long, env = "VIDEO_UPLOADR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive, overrides the configured level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging)?;

    info!("Starting Video Uploadr v{}", video_uploadr::VERSION);
    match args.config {
        Some(ref path) => info!("Loaded configuration from {:?}", path),
        None => info!("Loaded configuration from environment"),
    }
    info!(storage = ?config.storage, "Storage configuration");

    let sink = build_sink(&config).await?;
    let server = Server::bind(&config, sink).await?;
    server.run().await?;

    info!("Server stopped");
    Ok(())
}
