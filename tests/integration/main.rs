//! dagsync integration test harness.
//!
//! Every test builds a provider and a fetcher exchange in-process, connected
//! through the loopback transport, and drives real requests between them.
//!
//!   cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use dagsync_core::config::DagsyncConfig;
use dagsync_core::{Chain, PeerId};
use dagsync_services::request_manager::{ErrorReceiver, ProgressReceiver};
use dagsync_services::{GraphExchange, GraphSyncError, LoopbackNetwork, MemoryBlockStore, ResponseProgress};

mod failures;
mod fetch;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// A provider holding `chain` and an empty fetcher, both running.
pub struct Pair {
    pub network: LoopbackNetwork,
    pub provider: Arc<GraphExchange>,
    pub fetcher: Arc<GraphExchange>,
    pub chain: Chain,
    pub shutdown: CancellationToken,
}

impl Drop for Pair {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn pair(config: &DagsyncConfig, chain_length: usize, block_size: usize) -> Pair {
    let chain = Chain::build(chain_length, block_size).expect("chain builds");
    let network = LoopbackNetwork::new();
    let shutdown = CancellationToken::new();

    let provider_id = PeerId::generate();
    let (transport, inbox) = network.attach(provider_id);
    let provider = GraphExchange::new(
        provider_id,
        config,
        transport,
        MemoryBlockStore::from_blocks(&chain.blocks),
        &shutdown,
    );
    tokio::spawn(provider.clone().run_inbox(inbox));

    let fetcher_id = PeerId::generate();
    let (transport, inbox) = network.attach(fetcher_id);
    let fetcher = GraphExchange::new(fetcher_id, config, transport, MemoryBlockStore::new(), &shutdown);
    tokio::spawn(fetcher.clone().run_inbox(inbox));

    Pair {
        network,
        provider,
        fetcher,
        chain,
        shutdown,
    }
}

/// Drain progress until the request ends, then take its error, if any.
pub async fn collect(
    mut progress: ProgressReceiver,
    mut errors: ErrorReceiver,
) -> Result<(Vec<ResponseProgress>, Option<GraphSyncError>)> {
    let mut items = Vec::new();
    loop {
        match tokio::time::timeout(WAIT, progress.recv())
            .await
            .context("progress stalled")?
        {
            Some(item) => items.push(item),
            None => break,
        }
    }
    let error = tokio::time::timeout(WAIT, errors.recv())
        .await
        .context("error channel never closed")?;
    Ok((items, error))
}

/// Fail unless `items` is exactly the chain, in walk order.
pub fn verify_whole_chain(chain: &Chain, items: &[ResponseProgress]) -> Result<()> {
    if items.len() != chain.len() {
        bail!("received {} of {} nodes", items.len(), chain.len());
    }
    for (i, (item, block)) in items.iter().zip(&chain.blocks).enumerate() {
        if item.link != block.link || item.data != block.data {
            bail!("node {i} mismatch: got {}, expected {}", item.link, block.link);
        }
        if item.depth != i as u32 {
            bail!("node {i} reported depth {}", item.depth);
        }
    }
    Ok(())
}
