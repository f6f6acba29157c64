use anyhow::{Context, Result};
use proxy_node::origin::EchoOrigin;
use std::net::SocketAddr;
use tracing::info;

/// Standalone echo origin for manual testing of the proxy
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_node=info".into()),
        )
        .with_target(false)
        .init();

    let listen_addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8000".to_string())
        .parse()
        .context("Invalid listen address")?;

    let origin = EchoOrigin::bind(listen_addr).await?;
    info!(listen_addr = %origin.local_addr()?, "Starting test origin server");
    origin.run().await?;
    Ok(())
}
