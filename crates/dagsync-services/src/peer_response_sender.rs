//! Peer response sender — batches, dedups and sends responses for one peer.
//!
//! Any number of request handlers call the send/finish methods concurrently.
//! Each call takes the sender's lock just long enough to update the link
//! tracker and append to the newest response builder, then wakes the send
//! loop. The loop is a single task per peer: it drains every queued builder
//! in order and waits for the transport to finish each message before
//! handing over the next, so a slow peer only stalls itself.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dagsync_core::{Block, ExtensionData, Link, PeerId, RequestId, ResponseStatusCode};

use crate::linktracker::LinkTracker;
use crate::network::PeerMessageHandler;
use crate::response_builder::ResponseBuilder;

/// What `send_response` did with a block, for bandwidth accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockData {
    link: Link,
    block_size: u64,
    send_block: bool,
}

impl BlockData {
    pub fn link(&self) -> Link {
        self.link
    }

    /// Size of the block, whether or not it went on the wire.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Bytes actually queued for the wire. Zero when deduped or absent.
    pub fn block_size_on_wire(&self) -> u64 {
        if self.send_block {
            self.block_size
        } else {
            0
        }
    }
}

struct SenderState {
    link_tracker: LinkTracker,
    builders: Vec<ResponseBuilder>,
}

pub struct PeerResponseSender {
    peer: PeerId,
    handler: Arc<dyn PeerMessageHandler>,
    max_block_batch_bytes: u64,
    state: Mutex<SenderState>,
    outgoing_work: Notify,
    shutdown: CancellationToken,
}

impl PeerResponseSender {
    /// Create a sender for `peer`. It stops when `parent` is cancelled or
    /// when `shutdown` is called.
    pub fn new(
        peer: PeerId,
        handler: Arc<dyn PeerMessageHandler>,
        max_block_batch_bytes: u64,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer,
            handler,
            max_block_batch_bytes,
            state: Mutex::new(SenderState {
                link_tracker: LinkTracker::new(),
                builders: Vec::new(),
            }),
            outgoing_work: Notify::new(),
            shutdown: parent.child_token(),
        })
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Spawn the send loop.
    pub fn startup(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    /// Stop the send loop. A message already handed to the transport is abandoned.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Queue a traversed link for `request_id`. `data == None` means the
    /// block isn't available. The block bytes go on the wire only if no open
    /// request has already queued them for this peer.
    pub fn send_response(
        &self,
        request_id: RequestId,
        link: Link,
        data: Option<Bytes>,
    ) -> BlockData {
        let has_block = data.is_some();
        let (block_data, signal) = {
            let mut state = self.state.lock();
            let send_block = has_block && state.link_tracker.block_ref_count(&link) == 0;
            state
                .link_tracker
                .record_link_traversal(request_id, link, has_block);
            let block_data = BlockData {
                link,
                block_size: data.as_ref().map_or(0, |d| d.len() as u64),
                send_block,
            };

            let peer = self.peer;
            let signal = self.build_response(
                &mut state,
                block_data.block_size_on_wire(),
                |builder| {
                    if let (true, Some(data)) = (send_block, data) {
                        if !link.verify(&data) {
                            tracing::error!(
                                %peer,
                                request_id = %request_id,
                                %link,
                                "data did not match link when sending block"
                            );
                        }
                        builder.add_block(Block { link, data });
                    }
                    builder.add_link(request_id, link, has_block);
                },
            );
            (block_data, signal)
        };

        if signal {
            self.signal_work();
        }
        block_data
    }

    /// Attach an extension to the next response for `request_id`.
    pub fn send_extension_data(&self, request_id: RequestId, extension: ExtensionData) {
        let signal = {
            let mut state = self.state.lock();
            self.build_response(&mut state, 0, |builder| {
                builder.add_extension_data(request_id, extension)
            })
        };
        if signal {
            self.signal_work();
        }
    }

    /// Mark `request_id` done. The status is full if every traversed link
    /// had its block, partial otherwise.
    pub fn finish_request(&self, request_id: RequestId) -> ResponseStatusCode {
        let (status, signal) = {
            let mut state = self.state.lock();
            let status = if state.link_tracker.finish_request(request_id) {
                ResponseStatusCode::RequestCompletedFull
            } else {
                ResponseStatusCode::RequestCompletedPartial
            };
            let signal = self.build_response(&mut state, 0, |builder| {
                builder.add_response_code(request_id, status)
            });
            (status, signal)
        };
        if signal {
            self.signal_work();
        }
        status
    }

    /// Terminate `request_id` with an externally decided status.
    pub fn finish_with_error(&self, request_id: RequestId, status: ResponseStatusCode) {
        let signal = {
            let mut state = self.state.lock();
            state.link_tracker.finish_request(request_id);
            self.build_response(&mut state, 0, |builder| {
                builder.add_response_code(request_id, status)
            })
        };
        if signal {
            self.signal_work();
        }
    }

    /// Tell the peer `request_id` is paused. Tracker state is kept so the
    /// request can resume with more links later.
    pub fn pause_request(&self, request_id: RequestId) {
        let signal = {
            let mut state = self.state.lock();
            self.build_response(&mut state, 0, |builder| {
                builder.add_response_code(request_id, ResponseStatusCode::RequestPaused)
            })
        };
        if signal {
            self.signal_work();
        }
    }

    /// Apply `build` to the newest builder, opening a new one first if needed.
    /// Returns true if there is now work to send.
    fn build_response(
        &self,
        state: &mut SenderState,
        block_size: u64,
        build: impl FnOnce(&mut ResponseBuilder),
    ) -> bool {
        if should_begin_new_response(&state.builders, block_size, self.max_block_batch_bytes) {
            state.builders.push(ResponseBuilder::new());
        }
        let Some(builder) = state.builders.last_mut() else {
            return false;
        };
        build(builder);
        !builder.is_empty()
    }

    fn signal_work(&self) {
        // Notify keeps at most one permit: repeated signals coalesce.
        self.outgoing_work.notify_one();
    }

    async fn run(self: Arc<Self>) {
        tracing::debug!(peer = %self.peer, "response sender started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    tracing::debug!(peer = %self.peer, "response sender shutting down");
                    return;
                }

                _ = self.outgoing_work.notified() => {
                    self.send_response_messages().await;
                }
            }
        }
    }

    async fn send_response_messages(&self) {
        let builders = std::mem::take(&mut self.state.lock().builders);

        for builder in builders {
            if builder.is_empty() {
                continue;
            }
            let (responses, blocks) = match builder.build() {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(peer = %self.peer, error = %e, "unable to assemble response message");
                    continue;
                }
            };

            tracing::trace!(
                peer = %self.peer,
                responses = responses.len(),
                blocks = blocks.len(),
                "sending response message"
            );
            let done = self.handler.send_response(self.peer, responses, blocks);

            // Wait for the transport before handing over the next batch.
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                _ = done => {}
            }
        }
    }
}

fn should_begin_new_response(builders: &[ResponseBuilder], block_size: u64, max: u64) -> bool {
    let Some(last) = builders.last() else {
        return true;
    };
    if block_size == 0 {
        return false;
    }
    last.block_size() + block_size > max
}
