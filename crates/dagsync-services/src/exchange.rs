//! Exchange node — wires the request side and the serving side together.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use dagsync_core::config::DagsyncConfig;
use dagsync_core::{ExtensionData, GraphSyncMessage, Link, PeerId, Selector};

use crate::blockstore::MemoryBlockStore;
use crate::hooks::{RequestHooks, ResponseHooks};
use crate::loopback::Inbox;
use crate::memory_loader::MemoryAsyncLoader;
use crate::network::{PeerMessageHandler, PeerRequestHandler};
use crate::request_manager::{ErrorReceiver, ProgressReceiver, RequestManager};
use crate::responder::Responder;
use crate::response_senders::PeerResponseSenders;
use crate::traversal::SelectorTraversalBuilder;

/// One peer's exchange: fetches DAGs from others and serves its own store.
pub struct GraphExchange {
    peer: PeerId,
    store: MemoryBlockStore,
    loader: Arc<MemoryAsyncLoader>,
    manager: RequestManager,
    responder: Arc<Responder>,
    senders: Arc<PeerResponseSenders>,
    request_hooks: Arc<RequestHooks>,
    response_hooks: Arc<ResponseHooks>,
    shutdown: CancellationToken,
}

impl GraphExchange {
    /// Build and start an exchange node. Must be called inside a tokio runtime.
    pub fn new<T>(
        peer: PeerId,
        config: &DagsyncConfig,
        transport: Arc<T>,
        store: MemoryBlockStore,
        parent: &CancellationToken,
    ) -> Arc<Self>
    where
        T: PeerMessageHandler + PeerRequestHandler + 'static,
    {
        let shutdown = parent.child_token();
        let messages: Arc<dyn PeerMessageHandler> = transport.clone();
        let requests: Arc<dyn PeerRequestHandler> = transport;
        let traversal = Arc::new(SelectorTraversalBuilder);

        let loader = Arc::new(MemoryAsyncLoader::new(store.clone()));
        let request_hooks = Arc::new(RequestHooks::new());
        let response_hooks = Arc::new(ResponseHooks::new());
        let (manager, dispatcher) = RequestManager::new(
            &config.engine,
            loader.clone(),
            requests,
            traversal.clone(),
            request_hooks.clone(),
            response_hooks.clone(),
            &shutdown,
        );
        tokio::spawn(dispatcher.run());

        let senders = Arc::new(PeerResponseSenders::new(messages, &config.sender, &shutdown));
        let responder = Responder::new(store.clone(), senders.clone(), traversal, &shutdown);

        tracing::info!(%peer, "exchange started");
        Arc::new(Self {
            peer,
            store,
            loader,
            manager,
            responder,
            senders,
            request_hooks,
            response_hooks,
            shutdown,
        })
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn store(&self) -> &MemoryBlockStore {
        &self.store
    }

    /// Register extra persistence stores here.
    pub fn loader(&self) -> &MemoryAsyncLoader {
        &self.loader
    }

    pub fn request_hooks(&self) -> &RequestHooks {
        &self.request_hooks
    }

    pub fn response_hooks(&self) -> &ResponseHooks {
        &self.response_hooks
    }

    /// Fetch the DAG under `root` from `peer`.
    pub fn request(
        &self,
        ctx: CancellationToken,
        peer: PeerId,
        root: Link,
        selector: Selector,
        extensions: Vec<ExtensionData>,
    ) -> (ProgressReceiver, ErrorReceiver) {
        self.manager
            .send_request(ctx, peer, root, selector, extensions)
    }

    /// Route one incoming message: requests to the responder, responses and
    /// blocks to the request manager.
    pub fn receive_message(&self, from: PeerId, message: GraphSyncMessage) {
        let GraphSyncMessage {
            requests,
            responses,
            blocks,
        } = message;
        if !requests.is_empty() {
            self.responder.process_requests(from, requests);
        }
        if !responses.is_empty() || !blocks.is_empty() {
            self.manager.process_responses(from, responses, blocks);
        }
    }

    /// Pump `inbox` into `receive_message` until shutdown or the inbox closes.
    pub async fn run_inbox(self: Arc<Self>, mut inbox: Inbox) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = inbox.recv() => match next {
                    Some((from, message)) => self.receive_message(from, message),
                    None => break,
                },
            }
        }
        tracing::debug!(peer = %self.peer, "inbox closed");
    }

    /// Forget serving state for a peer that went away.
    pub fn peer_disconnected(&self, peer: PeerId) {
        self.senders.disconnected(peer);
    }

    /// Requests currently being served to other peers.
    pub fn serving(&self) -> usize {
        self.responder.in_flight()
    }

    pub fn shutdown(&self) {
        tracing::info!(peer = %self.peer, "exchange shutting down");
        self.shutdown.cancel();
    }
}
