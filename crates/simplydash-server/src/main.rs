//! Simplydash server binary

use common::logging::{self, LogFormat};
use simplydash_server::{Config, SimplydashServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (needed for logging settings)
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            // Can't use tracing yet - not initialized
            eprintln!("Configuration error: {}", e);
            eprintln!("Using default configuration");
            Config::default()
        }
    };

    logging::init(
        config.logging.level.as_deref().unwrap_or("info"),
        LogFormat::parse(config.logging.format.as_deref()),
    );

    tracing::info!("Simplydash starting");

    SimplydashServer::new(config).run().await
}
