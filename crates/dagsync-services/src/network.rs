//! Transport seams.
//!
//! The exchange engine never touches sockets. Outgoing requests and response
//! batches are handed to these traits; the transport decides how bytes move.

use tokio::sync::oneshot;

use dagsync_core::{Block, GraphSyncRequest, GraphSyncResponse, PeerId};

/// Sends response batches to a peer.
pub trait PeerMessageHandler: Send + Sync {
    /// Queue a response message for `peer`.
    ///
    /// The returned receiver resolves once the transport is done with the
    /// message (delivered, or given up on). Dropping the sender counts as done.
    /// The response sender waits on it before handing over the next batch
    /// for the same peer.
    fn send_response(
        &self,
        peer: PeerId,
        responses: Vec<GraphSyncResponse>,
        blocks: Vec<Block>,
    ) -> oneshot::Receiver<()>;
}

/// Sends requests (new, update, cancel) to a peer. Fire and forget.
pub trait PeerRequestHandler: Send + Sync {
    fn send_request(&self, peer: PeerId, request: GraphSyncRequest);
}
