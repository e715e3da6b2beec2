use clap::Parser;
use color_eyre::eyre::Result;
use http_connect_proxy::{Cli, ConnectProxy, ProxyConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("http_connect_proxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    color_eyre::install()?;

    let args = Cli::parse();
    let config = ProxyConfig::from_cli(args)?;

    let proxy = ConnectProxy::start(config)?;
    info!("HTTP CONNECT proxy listening on {}", proxy.authority());

    signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");

    let active = proxy.active_connections();
    if active > 0 {
        info!("Waiting for {active} tunnel connections to close...");
    }
    proxy.shutdown();
    info!("Server shutdown complete");

    Ok(())
}
