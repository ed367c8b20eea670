//! ncpaste: a netcat-friendly paste bin
//!
//! Two listeners share one paste directory:
//! - Raw TCP ingestion: pipe bytes in, get a URL back
//! - HTTP retrieval: `GET /<id>` serves the paste as plain text
//!
//! Features:
//! - Sequential hex ids persisted in a counter file, or random decimal ids
//! - Bounded paste size
//! - Configuration via CLI arguments or TOML file

mod config;
mod ids;
mod protocols;
mod server;
mod store;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        http_port = config.http_port,
        public_host = %config.public_host,
        id_policy = ?config.id_policy,
        max_size = config.max_size,
        read_to_eof = config.read_to_eof,
        "Starting ncpaste server"
    );

    let server = Server::bind(&config).await?;
    info!(address = %server.ingest_addr()?, "Paste ingestion listening");
    info!(address = %server.http_addr()?, "HTTP retrieval listening");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
