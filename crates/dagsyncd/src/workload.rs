//! Loopback fetch workload.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use dagsync_core::config::DagsyncConfig;
use dagsync_core::{Chain, Link, PeerId, Selector};
use dagsync_services::{GraphExchange, LoopbackNetwork, MemoryBlockStore};

#[derive(Debug, Serialize)]
pub struct Report {
    pub provider: String,
    pub fetcher: String,
    pub requests: usize,
    pub failed: usize,
    pub nodes_received: u64,
    pub bytes_received: u64,
    pub elapsed_ms: u128,
    pub transport: TransportReport,
}

#[derive(Debug, Serialize)]
pub struct TransportReport {
    pub messages: u64,
    pub requests: u64,
    pub responses: u64,
    pub block_bytes: u64,
    pub undeliverable: u64,
}

struct FetchOutcome {
    nodes: u64,
    bytes: u64,
    error: Option<String>,
}

pub async fn run(config: &DagsyncConfig, shutdown: &CancellationToken) -> Result<Report> {
    let workload = &config.workload;
    if workload.chain_length == 0 {
        bail!("workload.chain_length must be at least 1");
    }
    let chain = Chain::build(workload.chain_length, workload.block_size)
        .context("failed to build chain")?;

    let network = LoopbackNetwork::new();
    let provider_id = PeerId::generate();
    let fetcher_id = PeerId::generate();

    let (transport, inbox) = network.attach(provider_id);
    let provider = GraphExchange::new(
        provider_id,
        config,
        transport,
        MemoryBlockStore::from_blocks(&chain.blocks),
        shutdown,
    );
    tokio::spawn(provider.clone().run_inbox(inbox));

    let (transport, inbox) = network.attach(fetcher_id);
    let fetcher = GraphExchange::new(fetcher_id, config, transport, MemoryBlockStore::new(), shutdown);
    tokio::spawn(fetcher.clone().run_inbox(inbox));

    tracing::info!(provider = %provider_id, fetcher = %fetcher_id, root = %chain.tip(), "starting fetches");
    let started = Instant::now();
    let fetches = (0..workload.requests)
        .map(|index| fetch(&fetcher, provider_id, chain.tip(), shutdown.child_token(), index));
    let outcomes = futures::future::join_all(fetches).await;
    let elapsed = started.elapsed();

    let mut failed = 0;
    for (index, outcome) in outcomes.iter().enumerate() {
        if let Some(error) = &outcome.error {
            tracing::warn!(index, error = %error, "fetch failed");
            failed += 1;
        } else if outcome.nodes != chain.len() as u64 {
            tracing::warn!(index, nodes = outcome.nodes, expected = chain.len(), "fetch incomplete");
            failed += 1;
        }
    }

    provider.shutdown();
    fetcher.shutdown();

    let stats = network.stats();
    tracing::info!(
        failed,
        elapsed_ms = elapsed.as_millis() as u64,
        messages = stats.messages,
        block_bytes = stats.block_bytes,
        "workload finished"
    );
    Ok(Report {
        provider: provider_id.to_string(),
        fetcher: fetcher_id.to_string(),
        requests: workload.requests,
        failed,
        nodes_received: outcomes.iter().map(|o| o.nodes).sum(),
        bytes_received: outcomes.iter().map(|o| o.bytes).sum(),
        elapsed_ms: elapsed.as_millis(),
        transport: TransportReport {
            messages: stats.messages,
            requests: stats.requests,
            responses: stats.responses,
            block_bytes: stats.block_bytes,
            undeliverable: stats.undeliverable,
        },
    })
}

async fn fetch(
    exchange: &Arc<GraphExchange>,
    provider: PeerId,
    root: Link,
    ctx: CancellationToken,
    index: usize,
) -> FetchOutcome {
    let (mut progress, mut errors) =
        exchange.request(ctx, provider, root, Selector::explore_all(), Vec::new());

    let mut outcome = FetchOutcome {
        nodes: 0,
        bytes: 0,
        error: None,
    };
    while let Some(item) = progress.recv().await {
        outcome.nodes += 1;
        outcome.bytes += item.data.len() as u64;
    }
    outcome.error = errors.recv().await.map(|e| e.to_string());
    tracing::debug!(index, nodes = outcome.nodes, "fetch done");
    outcome
}
