//! In-memory async loader.
//!
//! Holds named persistence stores. Blocks arriving from the network land in
//! a shared receive cache and are copied into a request's store once that
//! request's metadata reports them. A load resolves as soon as the block is
//! in the request's store, fails once metadata says the peer lacks it, and
//! otherwise waits for more responses or for the request to complete.
//!
//! A cached block is held only for the requests whose metadata reported it
//! and that have not copied it yet. It is dropped once the last of them
//! copies it or is cleaned up, and immediately if no request reported it.
//! A peer sends a block once even when several requests traverse it, so a
//! request that learns of a block after the cache let it go copies it from
//! whichever registered store already persisted it.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use dagsync_core::{Block, Link, Metadata, RequestId};

use crate::blockstore::MemoryBlockStore;
use crate::loader::{AsyncLoader, LoadError, LoadResult};

pub const DEFAULT_PERSISTENCE_OPTION: &str = "";

struct Received {
    data: Bytes,
    /// Requests that reported this block and have not copied it yet.
    holders: HashSet<RequestId>,
}

type ReceiveCache = HashMap<Link, Received>;

struct RequestLoads {
    store: MemoryBlockStore,
    /// link -> block present, as last reported by the peer
    reported: HashMap<Link, bool>,
    completed: bool,
    waiting: Vec<(Link, oneshot::Sender<LoadResult>)>,
}

impl RequestLoads {
    /// `None` means keep waiting.
    fn resolve(
        &self,
        request_id: RequestId,
        link: &Link,
        received: &mut ReceiveCache,
        stores: &HashMap<String, MemoryBlockStore>,
    ) -> Option<LoadResult> {
        if let Some(data) = self.store.get(link) {
            return Some(Ok(data));
        }
        match self.reported.get(link) {
            Some(true) => {
                if let Some(data) = take_received(received, request_id, link)
                    .or_else(|| stores.values().find_map(|store| store.get(link)))
                {
                    self.store.put(Block {
                        link: *link,
                        data: data.clone(),
                    });
                    return Some(Ok(data));
                }
            }
            Some(false) => return Some(Err(LoadError::MissingBlock(*link))),
            None => {}
        }
        self.completed
            .then(|| Err(LoadError::MissingBlock(*link)))
    }

    fn wake(
        &mut self,
        request_id: RequestId,
        received: &mut ReceiveCache,
        stores: &HashMap<String, MemoryBlockStore>,
    ) {
        let waiting = std::mem::take(&mut self.waiting);
        for (link, tx) in waiting {
            match self.resolve(request_id, &link, received, stores) {
                Some(result) => {
                    let _ = tx.send(result);
                }
                None => self.waiting.push((link, tx)),
            }
        }
    }
}

/// Copy a cached block out for `request_id`, releasing its hold.
fn take_received(received: &mut ReceiveCache, request_id: RequestId, link: &Link) -> Option<Bytes> {
    let entry = received.get_mut(link)?;
    let data = entry.data.clone();
    entry.holders.remove(&request_id);
    if entry.holders.is_empty() {
        received.remove(link);
    }
    Some(data)
}

#[derive(Default)]
struct LoaderState {
    stores: HashMap<String, MemoryBlockStore>,
    requests: HashMap<RequestId, RequestLoads>,
    received: ReceiveCache,
}

pub struct MemoryAsyncLoader {
    state: Mutex<LoaderState>,
}

impl MemoryAsyncLoader {
    /// A loader whose default store is `store`.
    pub fn new(store: MemoryBlockStore) -> Self {
        let mut state = LoaderState::default();
        state
            .stores
            .insert(DEFAULT_PERSISTENCE_OPTION.to_string(), store);
        Self {
            state: Mutex::new(state),
        }
    }

    /// Make `store` selectable by name from an outgoing request hook.
    pub fn register_persistence_option(&self, name: impl Into<String>, store: MemoryBlockStore) {
        let name = name.into();
        tracing::debug!(persistence_option = %name, "registered persistence option");
        self.state.lock().stores.insert(name, store);
    }

    /// Requests already started keep the store they were given.
    pub fn unregister_persistence_option(&self, name: &str) -> bool {
        self.state.lock().stores.remove(name).is_some()
    }

    /// Requests with open load state.
    pub fn open_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Blocks held in the receive cache.
    pub fn cached_blocks(&self) -> usize {
        self.state.lock().received.len()
    }
}

impl AsyncLoader for MemoryAsyncLoader {
    fn start_request(
        &self,
        request_id: RequestId,
        persistence_option: &str,
    ) -> Result<(), LoadError> {
        let mut state = self.state.lock();
        let store = state
            .stores
            .get(persistence_option)
            .cloned()
            .ok_or_else(|| LoadError::UnknownStore(persistence_option.to_string()))?;
        state.requests.insert(
            request_id,
            RequestLoads {
                store,
                reported: HashMap::new(),
                completed: false,
                waiting: Vec::new(),
            },
        );
        Ok(())
    }

    fn process_response(&self, metadata: HashMap<RequestId, Metadata>, blocks: Vec<Block>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for block in blocks {
            state.received.entry(block.link).or_insert_with(|| Received {
                data: block.data,
                holders: HashSet::new(),
            });
        }

        for (request_id, items) in metadata {
            let Some(loads) = state.requests.get_mut(&request_id) else {
                continue;
            };
            for item in items {
                loads.reported.insert(item.link, item.block_present);
                if !item.block_present || loads.store.has(&item.link) {
                    continue;
                }
                if let Some(entry) = state.received.get_mut(&item.link) {
                    entry.holders.insert(request_id);
                }
            }
            loads.wake(request_id, &mut state.received, &state.stores);
        }

        let before = state.received.len();
        state.received.retain(|_, entry| !entry.holders.is_empty());
        let dropped = before - state.received.len();
        if dropped > 0 {
            tracing::debug!(dropped, "dropped blocks no open request reported");
        }
    }

    fn async_load(&self, request_id: RequestId, link: Link) -> oneshot::Receiver<LoadResult> {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(loads) = state.requests.get_mut(&request_id) else {
            let _ = tx.send(Err(LoadError::NotStarted(request_id)));
            return rx;
        };
        match loads.resolve(request_id, &link, &mut state.received, &state.stores) {
            Some(result) => {
                let _ = tx.send(result);
            }
            None => loads.waiting.push((link, tx)),
        }
        rx
    }

    fn complete_responses_for(&self, request_id: RequestId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(loads) = state.requests.get_mut(&request_id) {
            loads.completed = true;
            loads.wake(request_id, &mut state.received, &state.stores);
        }
    }

    fn cleanup_request(&self, request_id: RequestId) {
        let mut state = self.state.lock();
        state.requests.remove(&request_id);
        state.received.retain(|_, entry| {
            entry.holders.remove(&request_id);
            !entry.holders.is_empty()
        });
    }
}
