//! Block resolution seam between the request engine and block storage.
//!
//! The engine never reads blocks directly. It tells the loader which store a
//! request writes into, feeds it every response batch, and asks it for one
//! link at a time while traversing.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use dagsync_core::{Block, Link, Metadata, RequestId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("block {0} is missing")]
    MissingBlock(Link),

    #[error("unknown persistence option {0:?}")]
    UnknownStore(String),

    #[error("request {0} was never started")]
    NotStarted(RequestId),

    #[error("load abandoned")]
    Abandoned,
}

/// Result of one `async_load`. A dropped sender reads as `Abandoned`.
pub type LoadResult = Result<Bytes, LoadError>;

pub trait AsyncLoader: Send + Sync {
    /// Open load state for `request_id`, writing into the named store.
    /// `""` is the default store.
    fn start_request(&self, request_id: RequestId, persistence_option: &str)
        -> Result<(), LoadError>;

    /// Ingest one response batch: per-request link metadata plus every raw
    /// block that came with it.
    fn process_response(&self, metadata: HashMap<RequestId, Metadata>, blocks: Vec<Block>);

    /// Resolve `link` for `request_id`, now or once the network reports it.
    fn async_load(&self, request_id: RequestId, link: Link) -> oneshot::Receiver<LoadResult>;

    /// No more responses will arrive for `request_id`; pending and future
    /// loads of unreported links fail.
    fn complete_responses_for(&self, request_id: RequestId);

    /// Drop all state for `request_id`.
    fn cleanup_request(&self, request_id: RequestId);
}

/// Await a load, mapping a dropped sender to `Abandoned`.
pub async fn await_load(rx: oneshot::Receiver<LoadResult>) -> LoadResult {
    rx.await.unwrap_or(Err(LoadError::Abandoned))
}
