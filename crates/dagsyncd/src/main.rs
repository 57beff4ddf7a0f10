//! dagsyncd — runs a DAG exchange between two in-process nodes.
//!
//! A provider node holds a generated chain; a fetcher node requests it
//! `workload.requests` times concurrently over the loopback transport.
//! The run report is printed to stdout as JSON.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use dagsync_core::config::DagsyncConfig;

mod workload;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = DagsyncConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = DagsyncConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        DagsyncConfig::default()
    });
    tracing::info!(
        requests = config.workload.requests,
        chain_length = config.workload.chain_length,
        block_size = config.workload.block_size,
        max_block_batch_bytes = config.sender.max_block_batch_bytes,
        "dagsyncd starting"
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let report = workload::run(&config, &shutdown).await?;
    shutdown.cancel();

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failed > 0 {
        anyhow::bail!("{} of {} fetches failed", report.failed, report.requests);
    }
    Ok(())
}
