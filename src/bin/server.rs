//! memdc HTTP server
//!
//! Run with: memdc-server --port 8000

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use memdc::config::{IndexBackend, Settings};
use memdc::error::{MemdcError, Result};
use memdc::server::MemoryServer;
use memdc::MemoryService;

#[derive(Parser, Debug)]
#[command(name = "memdc-server")]
#[command(about = "Memory API backed by a Redis vector index and Salesforce Data Cloud")]
#[command(version)]
struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8000")]
    port: u16,

    /// Environment file loaded before reading settings
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Vector index backend, overrides INDEX_BACKEND (redis, memory)
    #[arg(long)]
    index: Option<IndexBackend>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.env_file.as_deref())?;
    if let Some(backend) = args.index {
        settings.index_backend = backend;
    }
    init_tracing(settings.log_level(), args.log_json);

    tracing::info!(
        version = memdc::VERSION,
        index = settings.index_backend.as_str(),
        "Starting memdc server"
    );

    let service = Arc::new(MemoryService::from_settings(&settings).await?);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| MemdcError::Config(format!("Invalid listen address: {}", e)))?;

    MemoryServer::new(service, addr).start().await?;
    Ok(())
}
