//! Runs a Parley rendezvous server with in-memory accounts.
//!
//! `PARLEY_ADDR` picks the bind address (default `127.0.0.1:2020`),
//! `RUST_LOG` the log filter (default `info`).

use parley::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:2020";

async fn start(addr: &str) -> Result<ParleyServer<MemoryCredentials, JsonCodec>, ParleyError> {
    ParleyServerBuilder::new()
        .bind(addr)
        .build(MemoryCredentials::new())
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr =
        std::env::var("PARLEY_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let server = start(&addr).await?;
    tracing::info!(addr = %server.local_addr()?, "accounts are in memory; register to create one");

    server.run().await?;
    Ok(())
}
