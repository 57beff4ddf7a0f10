//! Per-peer response sender registry.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use dagsync_core::config::SenderConfig;
use dagsync_core::PeerId;

use crate::network::PeerMessageHandler;
use crate::peer_response_sender::PeerResponseSender;

/// Lazily creates one running [`PeerResponseSender`] per peer.
pub struct PeerResponseSenders {
    handler: Arc<dyn PeerMessageHandler>,
    max_block_batch_bytes: u64,
    senders: DashMap<PeerId, Arc<PeerResponseSender>>,
    shutdown: CancellationToken,
}

impl PeerResponseSenders {
    pub fn new(
        handler: Arc<dyn PeerMessageHandler>,
        config: &SenderConfig,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            handler,
            max_block_batch_bytes: config.max_block_batch_bytes,
            senders: DashMap::new(),
            shutdown: parent.child_token(),
        }
    }

    /// The running sender for `peer`, started on first use.
    pub fn sender_for_peer(&self, peer: PeerId) -> Arc<PeerResponseSender> {
        self.senders
            .entry(peer)
            .or_insert_with(|| {
                let sender = PeerResponseSender::new(
                    peer,
                    self.handler.clone(),
                    self.max_block_batch_bytes,
                    &self.shutdown,
                );
                sender.startup();
                tracing::debug!(%peer, "started response sender");
                sender
            })
            .clone()
    }

    /// Stop and forget the sender for `peer`.
    pub fn disconnected(&self, peer: PeerId) {
        if let Some((_, sender)) = self.senders.remove(&peer) {
            sender.shutdown();
            tracing::debug!(%peer, "stopped response sender");
        }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Stop every sender.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.senders.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagsync_core::{Block, GraphSyncResponse};
    use tokio::sync::oneshot;

    struct NullHandler;

    impl PeerMessageHandler for NullHandler {
        fn send_response(
            &self,
            _peer: PeerId,
            _responses: Vec<GraphSyncResponse>,
            _blocks: Vec<Block>,
        ) -> oneshot::Receiver<()> {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(());
            rx
        }
    }

    fn senders() -> PeerResponseSenders {
        PeerResponseSenders::new(
            Arc::new(NullHandler),
            &SenderConfig::default(),
            &CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn one_sender_per_peer() {
        let senders = senders();
        let a = PeerId::from_bytes([1; 32]);
        let b = PeerId::from_bytes([2; 32]);

        let first = senders.sender_for_peer(a);
        let again = senders.sender_for_peer(a);
        assert!(Arc::ptr_eq(&first, &again));
        senders.sender_for_peer(b);
        assert_eq!(senders.len(), 2);
    }

    #[tokio::test]
    async fn disconnect_and_shutdown_stop_senders() {
        let senders = senders();
        let a = senders.sender_for_peer(PeerId::from_bytes([1; 32]));
        let b = senders.sender_for_peer(PeerId::from_bytes([2; 32]));

        senders.disconnected(a.peer());
        assert!(a.is_shut_down());
        assert!(!b.is_shut_down());
        assert_eq!(senders.len(), 1);

        senders.shutdown();
        assert!(b.is_shut_down());
        assert!(senders.is_empty());
    }
}
