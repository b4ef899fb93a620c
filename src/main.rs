use clap::Parser;
use std::{error::Error as StdError, sync::Arc};
use steward::{network, Args, PoolHandler, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn StdError>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_args(Args::parse())?;

    tracing::info!(
        "Serving {} - {} on interface '{}' as {}",
        config.pool.pool_start,
        config.pool.pool_end,
        config.interface,
        config.pool.server_ip
    );

    let socket = network::bind_server_socket(&config.interface, config.server_port)?;
    let handler = Arc::new(PoolHandler::new(config.pool, config.transaction.offer_timeout));
    let mut server = Server::new(socket, handler, config.transaction);

    server.run().await?;
    Ok(())
}
