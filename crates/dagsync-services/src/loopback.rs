//! Loopback transport — in-process message delivery between exchange nodes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use dagsync_core::{Block, GraphSyncMessage, GraphSyncRequest, GraphSyncResponse, PeerId};

use crate::network::{PeerMessageHandler, PeerRequestHandler};

/// Messages addressed to one attached peer, tagged with the sender.
pub type Inbox = mpsc::UnboundedReceiver<(PeerId, GraphSyncMessage)>;

#[derive(Debug, Default)]
pub struct TransportStats {
    messages: AtomicU64,
    requests: AtomicU64,
    responses: AtomicU64,
    block_bytes: AtomicU64,
    undeliverable: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportSnapshot {
    pub messages: u64,
    pub requests: u64,
    pub responses: u64,
    pub block_bytes: u64,
    pub undeliverable: u64,
}

impl TransportStats {
    fn record(&self, message: &GraphSyncMessage) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.requests
            .fetch_add(message.requests.len() as u64, Ordering::Relaxed);
        self.responses
            .fetch_add(message.responses.len() as u64, Ordering::Relaxed);
        self.block_bytes
            .fetch_add(message.block_bytes(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            block_bytes: self.block_bytes.load(Ordering::Relaxed),
            undeliverable: self.undeliverable.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    peers: Arc<DashMap<PeerId, mpsc::UnboundedSender<(PeerId, GraphSyncMessage)>>>,
    stats: Arc<TransportStats>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `peer`, returning its outgoing transport and its inbox.
    pub fn attach(&self, peer: PeerId) -> (Arc<LoopbackTransport>, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(peer, tx);
        let transport = Arc::new(LoopbackTransport {
            local: peer,
            network: self.clone(),
        });
        (transport, rx)
    }

    /// Stop delivering to `peer`. Its inbox closes.
    pub fn detach(&self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    pub fn stats(&self) -> TransportSnapshot {
        self.stats.snapshot()
    }

    fn deliver(&self, from: PeerId, to: PeerId, message: GraphSyncMessage) -> bool {
        let delivered = match self.peers.get(&to) {
            Some(inbox) => {
                self.stats.record(&message);
                inbox.send((from, message)).is_ok()
            }
            None => false,
        };
        if !delivered {
            self.stats.undeliverable.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%from, %to, "no route to peer, message dropped");
        }
        delivered
    }
}

/// One attached peer's view of the loopback network.
pub struct LoopbackTransport {
    local: PeerId,
    network: LoopbackNetwork,
}

impl LoopbackTransport {
    pub fn local_peer(&self) -> PeerId {
        self.local
    }
}

impl PeerMessageHandler for LoopbackTransport {
    fn send_response(
        &self,
        peer: PeerId,
        responses: Vec<GraphSyncResponse>,
        blocks: Vec<Block>,
    ) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.network.deliver(
            self.local,
            peer,
            GraphSyncMessage::with_responses(responses, blocks),
        );
        let _ = tx.send(());
        rx
    }
}

impl PeerRequestHandler for LoopbackTransport {
    fn send_request(&self, peer: PeerId, request: GraphSyncRequest) {
        self.network
            .deliver(self.local, peer, GraphSyncMessage::with_request(request));
    }
}
