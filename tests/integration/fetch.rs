use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use dagsync_core::config::DagsyncConfig;
use dagsync_core::{ExtensionData, Selector};
use dagsync_services::MemoryBlockStore;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Successful fetches
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_fetch_whole_chain() -> Result<()> {
    let p = pair(&DagsyncConfig::default(), 50, 256);
    let (progress, errors) = p.fetcher.request(
        CancellationToken::new(),
        p.provider.peer(),
        p.chain.tip(),
        Selector::explore_all(),
        Vec::new(),
    );

    let (items, error) = collect(progress, errors).await?;
    assert!(error.is_none(), "unexpected error: {error:?}");
    verify_whole_chain(&p.chain, &items)?;

    for block in &p.chain.blocks {
        assert!(p.fetcher.store().has(&block.link), "fetched block not persisted");
    }
    let stats = p.network.stats();
    assert_eq!(stats.undeliverable, 0);
    assert!(stats.block_bytes >= p.chain.blocks.iter().map(|b| b.len() as u64).sum::<u64>());
    Ok(())
}

#[tokio::test]
async fn test_depth_limited_fetch() -> Result<()> {
    let p = pair(&DagsyncConfig::default(), 20, 32);
    let (progress, errors) = p.fetcher.request(
        CancellationToken::new(),
        p.provider.peer(),
        p.chain.tip(),
        Selector::ExploreAll { max_depth: Some(4) },
        Vec::new(),
    );

    let (items, error) = collect(progress, errors).await?;
    assert!(error.is_none(), "unexpected error: {error:?}");
    assert_eq!(items.len(), 5);
    assert_eq!(items.last().map(|i| i.depth), Some(4));
    Ok(())
}

#[tokio::test]
async fn test_simultaneous_requests() -> Result<()> {
    let p = pair(&DagsyncConfig::default(), 40, 512);
    let ctx = CancellationToken::new();
    let request = || {
        p.fetcher.request(
            ctx.clone(),
            p.provider.peer(),
            p.chain.tip(),
            Selector::explore_all(),
            Vec::new(),
        )
    };
    let (progress1, errors1) = request();
    let (progress2, errors2) = request();

    let (first, second) = tokio::join!(collect(progress1, errors1), collect(progress2, errors2));
    let (items1, error1) = first?;
    let (items2, error2) = second?;
    assert!(error1.is_none() && error2.is_none());
    verify_whole_chain(&p.chain, &items1)?;
    verify_whole_chain(&p.chain, &items2)?;

    let chain_bytes: u64 = p.chain.blocks.iter().map(|b| b.len() as u64).sum();
    assert!(
        p.network.stats().block_bytes <= 2 * chain_bytes,
        "blocks sent more than once per request"
    );
    Ok(())
}

#[tokio::test]
async fn test_small_batches_still_deliver_everything() -> Result<()> {
    let mut config = DagsyncConfig::default();
    config.sender.max_block_batch_bytes = 1024;
    let p = pair(&config, 30, 700);
    let (progress, errors) = p.fetcher.request(
        CancellationToken::new(),
        p.provider.peer(),
        p.chain.tip(),
        Selector::explore_all(),
        Vec::new(),
    );
    let (items, error) = collect(progress, errors).await?;
    assert!(error.is_none());
    verify_whole_chain(&p.chain, &items)?;
    // Each node fills a whole message at this cap.
    assert!(p.network.stats().responses >= p.chain.len() as u64);
    Ok(())
}

#[tokio::test]
async fn test_hook_selects_persistence_store() -> Result<()> {
    let p = pair(&DagsyncConfig::default(), 10, 64);
    let side = MemoryBlockStore::new();
    p.fetcher.loader().register_persistence_option("side", side.clone());
    p.fetcher.request_hooks().register(|_, request, actions| {
        if request.extension("app/side").is_some() {
            actions.use_persistence_option("side");
        }
    });

    let (progress, errors) = p.fetcher.request(
        CancellationToken::new(),
        p.provider.peer(),
        p.chain.tip(),
        Selector::explore_all(),
        vec![ExtensionData::new("app/side", Bytes::new())],
    );
    let (items, error) = collect(progress, errors).await?;
    assert!(error.is_none());
    verify_whole_chain(&p.chain, &items)?;

    assert_eq!(side.len(), p.chain.len());
    assert!(p.fetcher.store().is_empty(), "default store must stay untouched");
    Ok(())
}

#[tokio::test]
async fn test_response_hooks_see_every_response() -> Result<()> {
    let p = pair(&DagsyncConfig::default(), 10, 64);
    let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    {
        let seen = seen.clone();
        p.fetcher.response_hooks().register(move |_, _, _| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
    }

    let (progress, errors) = p.fetcher.request(
        CancellationToken::new(),
        p.provider.peer(),
        p.chain.tip(),
        Selector::explore_all(),
        Vec::new(),
    );
    let (items, error) = collect(progress, errors).await?;
    assert!(error.is_none());
    assert_eq!(items.len(), p.chain.len());
    assert!(seen.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    Ok(())
}

#[tokio::test]
async fn test_serving_resumes_after_peer_disconnect() -> Result<()> {
    let p = pair(&DagsyncConfig::default(), 12, 128);
    let fetch = || {
        p.fetcher.request(
            CancellationToken::new(),
            p.provider.peer(),
            p.chain.tip(),
            Selector::explore_all(),
            Vec::new(),
        )
    };

    let (progress, errors) = fetch();
    let (items, error) = collect(progress, errors).await?;
    assert!(error.is_none());
    verify_whole_chain(&p.chain, &items)?;
    let sent_before = p.network.stats().block_bytes;

    p.provider.peer_disconnected(p.fetcher.peer());

    let (progress, errors) = fetch();
    let (items, error) = collect(progress, errors).await?;
    assert!(error.is_none(), "unexpected error: {error:?}");
    verify_whole_chain(&p.chain, &items)?;
    // The fetcher already holds the chain; wait for the provider's fresh
    // sender to put it on the wire again anyway.
    tokio::time::timeout(WAIT, async {
        while p.network.stats().block_bytes < 2 * sent_before {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .context("provider did not serve after disconnect")?;
    Ok(())
}
