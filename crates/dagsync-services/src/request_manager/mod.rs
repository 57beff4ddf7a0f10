//! Request manager — issues outgoing requests and executes them.
//!
//! All state transitions for pending requests happen on one dispatcher task
//! fed by an unbounded queue: new requests, incoming response batches,
//! cancellations and finished traversals. Each request's traversal runs on
//! its own task (see `executor`) that pulls blocks through the async loader
//! and streams progress to the caller.
//!
//! Per request the caller gets two channels: progress records in traversal
//! order, and at most one terminal error. Both close when the request ends,
//! whichever way it ends.

mod executor;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dagsync_core::config::EngineConfig;
use dagsync_core::metadata::decode_metadata;
use dagsync_core::wire::{Priority, EXTENSION_METADATA};
use dagsync_core::{
    Block, ExtensionData, GraphSyncRequest, GraphSyncResponse, Link, Metadata, PeerId, RequestId,
    ResponseStatusCode, Selector,
};

use crate::error::GraphSyncError;
use crate::hooks::{merge_extensions, RequestHooks, ResponseHooks};
use crate::loader::AsyncLoader;
use crate::network::PeerRequestHandler;
use crate::traversal::{NodeStyle, TraversalBuilder};

use executor::RequestExecution;

/// One node delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseProgress {
    pub link: Link,
    pub data: Bytes,
    pub depth: u32,
    pub style: NodeStyle,
}

pub type ProgressReceiver = mpsc::Receiver<ResponseProgress>;
pub type ErrorReceiver = mpsc::UnboundedReceiver<GraphSyncError>;

/// Single-shot error channel shared by the dispatcher and the executor.
/// The first `fail` delivers and closes; later calls are no-ops.
#[derive(Clone)]
struct ErrorSink(Arc<Mutex<Option<mpsc::UnboundedSender<GraphSyncError>>>>);

impl ErrorSink {
    fn new(tx: mpsc::UnboundedSender<GraphSyncError>) -> Self {
        Self(Arc::new(Mutex::new(Some(tx))))
    }

    fn fail(&self, err: GraphSyncError) -> bool {
        match self.0.lock().take() {
            Some(tx) => {
                let _ = tx.send(err);
                true
            }
            None => false,
        }
    }

    fn close(&self) {
        self.0.lock().take();
    }
}

struct NewRequest {
    ctx: CancellationToken,
    peer: PeerId,
    root: Link,
    selector: Selector,
    extensions: Vec<ExtensionData>,
    progress: mpsc::Sender<ResponseProgress>,
    errors: ErrorSink,
}

enum ManagerMessage {
    NewRequest(NewRequest),
    ProcessResponses {
        peer: PeerId,
        responses: Vec<GraphSyncResponse>,
        blocks: Vec<Block>,
    },
    /// The caller cancelled or stopped listening.
    CancelRequest(RequestId),
    /// The traversal ended on its own, with or without an error.
    TraversalFinished(RequestId),
}

/// Handle to a running request manager. Cheap to clone.
#[derive(Clone)]
pub struct RequestManager {
    tx: mpsc::UnboundedSender<ManagerMessage>,
    shutdown: CancellationToken,
    progress_buffer: usize,
}

impl RequestManager {
    /// Create a manager and its dispatcher. Spawn `dispatcher.run()` to start
    /// processing. Cancelling `shutdown` stops it and silently closes every
    /// pending request.
    pub fn new(
        config: &EngineConfig,
        loader: Arc<dyn AsyncLoader>,
        peer_handler: Arc<dyn PeerRequestHandler>,
        traversal_builder: Arc<dyn TraversalBuilder>,
        request_hooks: Arc<RequestHooks>,
        response_hooks: Arc<ResponseHooks>,
        shutdown: &CancellationToken,
    ) -> (Self, RequestDispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = RequestDispatcher {
            rx,
            weak_tx: tx.downgrade(),
            loader,
            peer_handler,
            traversal_builder,
            request_hooks,
            response_hooks,
            default_priority: config.default_priority,
            shutdown: shutdown.clone(),
            next_request_id: 0,
            requests: HashMap::new(),
        };
        let manager = Self {
            tx,
            shutdown: shutdown.clone(),
            progress_buffer: config.progress_buffer.max(1),
        };
        (manager, dispatcher)
    }

    /// Ask `peer` for the DAG under `root`. Cancelling `ctx` cancels the
    /// request; so does dropping the progress receiver. If the manager is
    /// no longer running, both channels come back already closed.
    pub fn send_request(
        &self,
        ctx: CancellationToken,
        peer: PeerId,
        root: Link,
        selector: Selector,
        extensions: Vec<ExtensionData>,
    ) -> (ProgressReceiver, ErrorReceiver) {
        let (progress_tx, progress_rx) = mpsc::channel(self.progress_buffer);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        if self.shutdown.is_cancelled() {
            return (progress_rx, error_rx);
        }

        let message = ManagerMessage::NewRequest(NewRequest {
            ctx,
            peer,
            root,
            selector,
            extensions,
            progress: progress_tx,
            errors: ErrorSink::new(error_tx),
        });
        if self.tx.send(message).is_err() {
            tracing::debug!(%peer, "request manager stopped, request dropped");
        }
        (progress_rx, error_rx)
    }

    /// Hand over a response batch received from `peer`.
    pub fn process_responses(
        &self,
        peer: PeerId,
        responses: Vec<GraphSyncResponse>,
        blocks: Vec<Block>,
    ) {
        let _ = self.tx.send(ManagerMessage::ProcessResponses {
            peer,
            responses,
            blocks,
        });
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.tx.is_closed()
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

struct InProgressRequest {
    peer: PeerId,
    abort: CancellationToken,
    errors: ErrorSink,
    /// Peer reported a completed status; further responses are ignored.
    remote_completed: bool,
}

/// Owns the pending-request table. Runs until shutdown or until every
/// manager handle and request task is gone.
pub struct RequestDispatcher {
    rx: mpsc::UnboundedReceiver<ManagerMessage>,
    weak_tx: mpsc::WeakUnboundedSender<ManagerMessage>,
    loader: Arc<dyn AsyncLoader>,
    peer_handler: Arc<dyn PeerRequestHandler>,
    traversal_builder: Arc<dyn TraversalBuilder>,
    request_hooks: Arc<RequestHooks>,
    response_hooks: Arc<ResponseHooks>,
    default_priority: Priority,
    shutdown: CancellationToken,
    next_request_id: u64,
    requests: HashMap<RequestId, InProgressRequest>,
}

impl RequestDispatcher {
    pub async fn run(mut self) {
        tracing::debug!("request manager started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                message = self.rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }
        self.close_all();
    }

    fn handle(&mut self, message: ManagerMessage) {
        match message {
            ManagerMessage::NewRequest(request) => self.new_request(request),
            ManagerMessage::ProcessResponses {
                peer,
                responses,
                blocks,
            } => self.process_responses(peer, responses, blocks),
            ManagerMessage::CancelRequest(request_id) => self.cancel_request(request_id),
            ManagerMessage::TraversalFinished(request_id) => self.traversal_finished(request_id),
        }
    }

    fn new_request(&mut self, new: NewRequest) {
        let NewRequest {
            ctx,
            peer,
            root,
            selector,
            extensions,
            progress,
            errors,
        } = new;
        if ctx.is_cancelled() {
            return;
        }

        let request_id = RequestId(self.next_request_id);
        self.next_request_id += 1;

        let request = GraphSyncRequest::new(
            request_id,
            root,
            selector.clone(),
            self.default_priority,
            extensions,
        );
        let selected = self.request_hooks.process_hooks(peer, &request);

        if let Err(e) = self
            .loader
            .start_request(request_id, &selected.persistence_option)
        {
            tracing::warn!(%request_id, %peer, error = %e, "could not start request");
            errors.fail(GraphSyncError::StartFailed(e));
            return;
        }
        let Some(manager) = self.weak_tx.upgrade() else {
            self.loader.cleanup_request(request_id);
            return;
        };

        tracing::info!(
            %request_id,
            %peer,
            %root,
            persistence_option = %selected.persistence_option,
            "sending request"
        );
        self.peer_handler.send_request(peer, request);

        let abort = self.shutdown.child_token();
        let traversal = self.traversal_builder.begin(root, &selector, selected.chooser);
        self.requests.insert(
            request_id,
            InProgressRequest {
                peer,
                abort: abort.clone(),
                errors: errors.clone(),
                remote_completed: false,
            },
        );

        tokio::spawn(
            RequestExecution {
                request_id,
                ctx,
                abort,
                traversal,
                loader: self.loader.clone(),
                progress,
                errors,
                manager,
            }
            .run(),
        );
    }

    fn accepts(&self, peer: PeerId, request_id: RequestId) -> bool {
        match self.requests.get(&request_id) {
            Some(request) if request.peer == peer => !request.remote_completed,
            Some(request) => {
                tracing::warn!(
                    %request_id,
                    %peer,
                    expected = %request.peer,
                    "response from unexpected peer"
                );
                false
            }
            None => false,
        }
    }

    fn process_responses(
        &mut self,
        peer: PeerId,
        responses: Vec<GraphSyncResponse>,
        blocks: Vec<Block>,
    ) {
        let responses: Vec<GraphSyncResponse> = responses
            .into_iter()
            .filter(|response| self.accepts(peer, response.id()))
            .collect();
        if responses.is_empty() {
            return;
        }

        let mut metadata: HashMap<RequestId, Metadata> = HashMap::new();
        for response in &responses {
            let items = match response.extension(EXTENSION_METADATA) {
                Some(data) => decode_metadata(data).unwrap_or_else(|e| {
                    tracing::warn!(
                        request_id = %response.id(),
                        %peer,
                        error = %e,
                        "dropping undecodable response metadata"
                    );
                    Metadata::new()
                }),
                None => Metadata::new(),
            };
            metadata.entry(response.id()).or_default().extend(items);
        }
        self.loader.process_response(metadata, blocks);

        let mut updates: Vec<(RequestId, Vec<ExtensionData>)> = Vec::new();
        for response in &responses {
            let request_id = response.id();
            if !self.requests.contains_key(&request_id) {
                continue;
            }

            let result = self.response_hooks.process_hooks(peer, response);
            if !result.extensions.is_empty() {
                match updates.iter_mut().find(|(id, _)| *id == request_id) {
                    Some((_, pending)) => merge_extensions(pending, result.extensions),
                    None => updates.push((request_id, result.extensions)),
                }
            }

            if let Some(err) = result.err {
                self.fail_request(request_id, GraphSyncError::HookTerminated(err));
                continue;
            }

            let status = response.status();
            if status.is_failure() {
                self.fail_request(request_id, GraphSyncError::RemoteFailure(status));
            } else if status.is_success() {
                tracing::debug!(%request_id, %status, "peer completed request");
                if let Some(request) = self.requests.get_mut(&request_id) {
                    request.remote_completed = true;
                }
                self.loader.complete_responses_for(request_id);
            } else if status == ResponseStatusCode::RequestPaused {
                tracing::debug!(%request_id, "peer paused request");
            }
        }

        for (request_id, extensions) in updates {
            tracing::debug!(%request_id, extensions = extensions.len(), "sending request update");
            self.peer_handler
                .send_request(peer, GraphSyncRequest::update(request_id, extensions));
        }
    }

    fn fail_request(&mut self, request_id: RequestId, err: GraphSyncError) {
        let Some(request) = self.requests.remove(&request_id) else {
            return;
        };
        tracing::warn!(%request_id, peer = %request.peer, error = %err, "request failed");
        request.abort.cancel();
        request.errors.fail(err);
        self.loader.cleanup_request(request_id);
    }

    fn cancel_request(&mut self, request_id: RequestId) {
        let Some(request) = self.requests.remove(&request_id) else {
            return;
        };
        tracing::info!(%request_id, peer = %request.peer, "cancelling request");
        self.peer_handler
            .send_request(request.peer, GraphSyncRequest::cancel(request_id));
        request.abort.cancel();
        request.errors.close();
        self.loader.cleanup_request(request_id);
    }

    fn traversal_finished(&mut self, request_id: RequestId) {
        let Some(request) = self.requests.remove(&request_id) else {
            return;
        };
        tracing::debug!(%request_id, peer = %request.peer, "request finished");
        request.errors.close();
        self.loader.cleanup_request(request_id);
    }

    fn close_all(&mut self) {
        for (request_id, request) in self.requests.drain() {
            request.abort.cancel();
            request.errors.close();
            self.loader.cleanup_request(request_id);
        }
        tracing::debug!("request manager stopped");
    }
}
