use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use dagsync_core::config::DagsyncConfig;
use dagsync_core::{Link, PeerId, ResponseStatusCode, Selector};
use dagsync_services::{GraphExchange, GraphSyncError, MemoryBlockStore};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Failures & cancellation
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_missing_root_is_remote_failure() -> Result<()> {
    let p = pair(&DagsyncConfig::default(), 5, 32);
    let (progress, errors) = p.fetcher.request(
        CancellationToken::new(),
        p.provider.peer(),
        Link::for_data(b"not in any store"),
        Selector::explore_all(),
        Vec::new(),
    );

    let (items, error) = collect(progress, errors).await?;
    assert!(items.is_empty());
    let error = error.context("expected a terminal error")?;
    assert_eq!(
        error.remote_status(),
        Some(ResponseStatusCode::RequestFailedContentNotFound)
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_interior_block_fails_fetch() -> Result<()> {
    let p = pair(&DagsyncConfig::default(), 6, 32);
    // Provider serves a store holding only the first half of the chain.
    let partial = MemoryBlockStore::from_blocks(p.chain.range(0, 3));
    let (transport, inbox) = p.network.attach(PeerId::generate());
    let provider = GraphExchange::new(
        transport.local_peer(),
        &DagsyncConfig::default(),
        transport,
        partial,
        &p.shutdown,
    );
    tokio::spawn(provider.clone().run_inbox(inbox));

    let (progress, errors) = p.fetcher.request(
        CancellationToken::new(),
        provider.peer(),
        p.chain.tip(),
        Selector::explore_all(),
        Vec::new(),
    );
    let (items, error) = collect(progress, errors).await?;
    assert_eq!(items.len(), 3, "nodes up to the gap are delivered");
    match error {
        Some(GraphSyncError::Resolver { link, .. }) => assert_eq!(link, p.chain.blocks[3].link),
        other => bail!("expected resolver error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_cancel_mid_fetch() -> Result<()> {
    let mut config = DagsyncConfig::default();
    config.engine.progress_buffer = 1;
    let p = pair(&config, 200, 64);
    let ctx = CancellationToken::new();
    let (mut progress, mut errors) = p.fetcher.request(
        ctx.clone(),
        p.provider.peer(),
        p.chain.tip(),
        Selector::explore_all(),
        Vec::new(),
    );

    let first = tokio::time::timeout(WAIT, progress.recv())
        .await?
        .context("no progress before cancel")?;
    assert_eq!(first.link, p.chain.tip());
    ctx.cancel();

    let mut received = 1;
    while let Some(_item) = tokio::time::timeout(WAIT, progress.recv()).await? {
        received += 1;
    }
    assert!(received < p.chain.len(), "cancel did not stop the traversal");
    let error = tokio::time::timeout(WAIT, errors.recv()).await?;
    assert!(error.is_none(), "cancellation is not an error: {error:?}");
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_requests_silently() -> Result<()> {
    let mut config = DagsyncConfig::default();
    config.engine.progress_buffer = 1;
    let p = pair(&config, 200, 64);
    let (mut progress, errors) = p.fetcher.request(
        CancellationToken::new(),
        p.provider.peer(),
        p.chain.tip(),
        Selector::explore_all(),
        Vec::new(),
    );
    tokio::time::timeout(WAIT, progress.recv())
        .await?
        .context("no progress before shutdown")?;

    p.fetcher.shutdown();
    let (rest, error) = collect(progress, errors).await?;
    assert!(rest.len() < p.chain.len());
    assert!(error.is_none());

    let (mut late, mut late_errors) = p.fetcher.request(
        CancellationToken::new(),
        p.provider.peer(),
        p.chain.tip(),
        Selector::explore_all(),
        Vec::new(),
    );
    assert!(late.recv().await.is_none());
    assert!(late_errors.recv().await.is_none());
    Ok(())
}
