//! Tradestream node binary.
//!
//! Loads `EngineConfig` from the file named by `TRADESTREAM_CONFIG` (defaults
//! otherwise), installs logging, starts the matching loop and runs until
//! ctrl-c.

use tradestream_node::{Node, banner, init_tracing};
use tradestream_types::{EngineConfig, Result, TradestreamError};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env()?;
    init_tracing(&config.log)?;
    tracing::info!("{}", banner(&config));

    let node = Node::new(config)?;
    let matching = node.start_matching();

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| TradestreamError::Internal(format!("ctrl-c handler: {err}")))?;
    tracing::info!("Shutdown requested");

    matching.stop().await?;
    tracing::info!("Tradestream node stopped");
    Ok(())
}
