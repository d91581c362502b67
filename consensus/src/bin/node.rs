//! Consensus Node Binary
//!
//! Opens the consensus set on a RocksDB store and logs every path change
//! until interrupted. Blocks arrive through the library API; this binary
//! only hosts the state.

use anyhow::Context;
use consensus::{Config, ConsensusSet, SubscriberTier};
use prometheus::{Encoder, TextEncoder};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    info!("Starting consensus node");

    // Load configuration
    let config = if let Ok(config_path) = std::env::var("CONSENSUS_CONFIG") {
        info!("Loading config from: {}", config_path);
        Config::from_file(&config_path)?
    } else {
        info!("Loading config from environment variables");
        Config::from_env()?
    };

    info!(
        "Node ID: {}, data dir: {:?}, maturity delay: {}",
        config.node_id, config.ledger.data_dir, config.chain.maturity_delay
    );

    let metrics_enabled = config.metrics_enabled;
    let consensus = ConsensusSet::open_default(config)
        .await
        .context("opening consensus set")?;

    info!(
        height = consensus.height(),
        tip = ?consensus.current_block(),
        "Consensus node running"
    );

    // Log path changes
    let mut subscription = consensus
        .subscribe("node-log", SubscriberTier::Consensus)
        .await?;
    let logger = tokio::spawn(async move {
        while let Some(notification) = subscription.recv().await {
            let update = &notification.update;
            info!(
                height = update.height,
                tip = %update.tip,
                reverted = update.reverted_blocks.len(),
                applied = update.applied_blocks.len(),
                "Best path changed"
            );
            notification.ack();
        }
    });

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    // Graceful shutdown
    info!("Shutting down consensus node...");
    if let Err(e) = consensus.close().await {
        error!("Error closing consensus set: {}", e);
    }
    let _ = logger.await;

    if metrics_enabled {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&consensus.metrics().registry().gather(), &mut buffer)?;
        info!("Final metrics:\n{}", String::from_utf8_lossy(&buffer));
    }

    info!("Consensus node stopped");
    Ok(())
}
