//! Responder — serves incoming requests from a local block store.
//!
//! Each new request gets its own task that walks the selector over the
//! store and pushes every visited link through the peer's response sender.
//! Links missing locally are reported absent and not descended into.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use dagsync_core::wire::RequestKind;
use dagsync_core::{GraphSyncRequest, Link, PeerId, RequestId, ResponseStatusCode, Selector};

use crate::blockstore::MemoryBlockStore;
use crate::peer_response_sender::PeerResponseSender;
use crate::response_senders::PeerResponseSenders;
use crate::traversal::TraversalBuilder;

pub struct Responder {
    store: MemoryBlockStore,
    senders: Arc<PeerResponseSenders>,
    traversal_builder: Arc<dyn TraversalBuilder>,
    /// In-flight requests, for cancellation.
    active: DashMap<(PeerId, RequestId), CancellationToken>,
    shutdown: CancellationToken,
}

impl Responder {
    pub fn new(
        store: MemoryBlockStore,
        senders: Arc<PeerResponseSenders>,
        traversal_builder: Arc<dyn TraversalBuilder>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            senders,
            traversal_builder,
            active: DashMap::new(),
            shutdown: parent.child_token(),
        })
    }

    pub fn process_requests(self: &Arc<Self>, peer: PeerId, requests: Vec<GraphSyncRequest>) {
        for request in requests {
            let request_id = request.id();
            match request.kind() {
                RequestKind::New => self.start(peer, request),
                RequestKind::Cancel => {
                    if let Some((_, token)) = self.active.remove(&(peer, request_id)) {
                        tracing::debug!(%peer, %request_id, "peer cancelled request");
                        token.cancel();
                    }
                }
                RequestKind::Update => {
                    tracing::debug!(
                        %peer,
                        %request_id,
                        extensions = request.extensions().len(),
                        "ignoring request update"
                    );
                }
            }
        }
    }

    /// Requests currently being served.
    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    fn start(self: &Arc<Self>, peer: PeerId, request: GraphSyncRequest) {
        let request_id = request.id();
        let (Some(root), Some(selector)) = (request.root(), request.selector().cloned()) else {
            tracing::warn!(%peer, %request_id, "new request without root or selector");
            return;
        };

        let cancel = self.shutdown.child_token();
        self.active.insert((peer, request_id), cancel.clone());

        let responder = self.clone();
        tokio::spawn(async move {
            let sender = responder.senders.sender_for_peer(peer);
            responder
                .serve(&sender, request_id, root, selector, cancel)
                .await;
            responder.active.remove(&(peer, request_id));
        });
    }

    async fn serve(
        &self,
        sender: &PeerResponseSender,
        request_id: RequestId,
        root: Link,
        selector: Selector,
        cancel: CancellationToken,
    ) {
        let peer = sender.peer();
        if !self.store.has(&root) {
            tracing::info!(%peer, %request_id, %root, "root not found");
            sender.finish_with_error(request_id, ResponseStatusCode::RequestFailedContentNotFound);
            return;
        }

        tracing::debug!(%peer, %request_id, %root, "serving request");
        let mut traversal = self.traversal_builder.begin(root, &selector, None);
        let mut sent_bytes = 0u64;
        while let Some(link) = traversal.current_link() {
            if cancel.is_cancelled() {
                // Finishing through the sender releases this request's
                // link-tracker references; the peer also gets a terminal status.
                sender.finish_with_error(request_id, ResponseStatusCode::RequestCancelled);
                return;
            }

            match self.store.get(&link) {
                Some(data) => {
                    sent_bytes += sender
                        .send_response(request_id, link, Some(data.clone()))
                        .block_size_on_wire();
                    if let Err(e) = traversal.advance(&data) {
                        tracing::warn!(%peer, %request_id, error = %e, "traversal failed");
                        sender.finish_with_error(request_id, ResponseStatusCode::RequestFailedUnknown);
                        return;
                    }
                }
                None => {
                    sender.send_response(request_id, link, None);
                    traversal.skip_current();
                }
            }

            // Give cancels and other requests a chance between blocks.
            tokio::task::yield_now().await;
        }

        let status = sender.finish_request(request_id);
        tracing::info!(%peer, %request_id, %status, sent_bytes, "finished serving request");
    }
}
