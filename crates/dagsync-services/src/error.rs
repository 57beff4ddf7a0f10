//! Terminal errors delivered on a request's error channel.

use dagsync_core::{Link, ResponseStatusCode};

use crate::loader::LoadError;
use crate::traversal::TraversalError;

/// Why an outgoing request failed. Each request emits at most one.
/// Cancellation is not an error: the channels just close.
#[derive(Debug, thiserror::Error)]
pub enum GraphSyncError {
    #[error("loading {link} failed: {source}")]
    Resolver {
        link: Link,
        #[source]
        source: LoadError,
    },

    #[error("remote peer failed the request: {0}")]
    RemoteFailure(ResponseStatusCode),

    #[error("request terminated by hook: {0:#}")]
    HookTerminated(anyhow::Error),

    #[error("could not start request: {0}")]
    StartFailed(#[source] LoadError),

    #[error(transparent)]
    Traversal(#[from] TraversalError),
}

impl GraphSyncError {
    /// The peer-reported status, for remote failures.
    pub fn remote_status(&self) -> Option<ResponseStatusCode> {
        match self {
            Self::RemoteFailure(status) => Some(*status),
            _ => None,
        }
    }
}
