//! Per-request traversal task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dagsync_core::RequestId;

use super::{ErrorSink, ManagerMessage, ResponseProgress};
use crate::error::GraphSyncError;
use crate::loader::{await_load, AsyncLoader};
use crate::traversal::Traversal;

enum Exit {
    /// Walk ended on its own, possibly after reporting an error.
    Finished,
    /// Caller cancelled or dropped the progress receiver.
    Cancelled,
    /// Dispatcher ended the request (failure or shutdown).
    Aborted,
}

pub(super) struct RequestExecution {
    pub request_id: RequestId,
    pub ctx: CancellationToken,
    pub abort: CancellationToken,
    pub traversal: Box<dyn Traversal>,
    pub loader: Arc<dyn AsyncLoader>,
    pub progress: mpsc::Sender<ResponseProgress>,
    pub errors: ErrorSink,
    pub manager: mpsc::UnboundedSender<ManagerMessage>,
}

impl RequestExecution {
    pub async fn run(mut self) {
        let message = match self.traverse().await {
            Exit::Finished => {
                // Locally done: a failure status still queued for the
                // dispatcher must not surface.
                self.errors.close();
                ManagerMessage::TraversalFinished(self.request_id)
            }
            Exit::Cancelled => ManagerMessage::CancelRequest(self.request_id),
            Exit::Aborted => return,
        };
        let _ = self.manager.send(message);
    }

    async fn traverse(&mut self) -> Exit {
        while let Some(link) = self.traversal.current_link() {
            let load = self.loader.async_load(self.request_id, link);
            let loaded = tokio::select! {
                biased;
                _ = self.abort.cancelled() => return Exit::Aborted,
                _ = self.ctx.cancelled() => return Exit::Cancelled,
                _ = self.progress.closed() => return Exit::Cancelled,
                loaded = await_load(load) => loaded,
            };

            let data = match loaded {
                Ok(data) => data,
                Err(source) => {
                    tracing::debug!(request_id = %self.request_id, %link, error = %source, "load failed");
                    self.errors.fail(GraphSyncError::Resolver { link, source });
                    return Exit::Finished;
                }
            };
            let visited = match self.traversal.advance(&data) {
                Ok(visited) => visited,
                Err(e) => {
                    self.errors.fail(e.into());
                    return Exit::Finished;
                }
            };

            let progress = ResponseProgress {
                link: visited.link,
                data,
                depth: visited.depth,
                style: visited.style,
            };
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => return Exit::Aborted,
                _ = self.ctx.cancelled() => return Exit::Cancelled,
                sent = self.progress.send(progress) => {
                    if sent.is_err() {
                        return Exit::Cancelled;
                    }
                }
            }
        }
        Exit::Finished
    }
}
