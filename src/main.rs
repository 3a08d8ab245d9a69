mod config;
mod game;
mod net;
mod util;

use tracing::{error, info};

use crate::config::ServerConfig;
use crate::net::server::Server;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env locally; safe to ignore when not present.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = ServerConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("invalid configuration: {}", e);
    }
    info!(
        "slink server starting on {}:{} (max packet {})",
        config.bind_address, config.port, config.max_packet
    );

    let server = Server::bind(config).await?;
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let runner = tokio::spawn(server.run(shutdown_tx.clone()));

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    match runner.await {
        Ok(Ok(())) => info!("server stopped"),
        Ok(Err(e)) => error!("server error: {}", e),
        Err(e) => error!("server task failed: {}", e),
    }
    Ok(())
}
