//! Hook registries for outgoing requests and incoming responses.
//!
//! Hooks run synchronously in registration order and all of them always
//! run. A later hook overwrites the selections of an earlier one. The hook
//! list is snapshotted before invocation, so a hook may register or
//! unregister hooks without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use dagsync_core::{ExtensionData, GraphSyncRequest, GraphSyncResponse, PeerId};

use crate::memory_loader::DEFAULT_PERSISTENCE_OPTION;
use crate::traversal::NodeStyleChooser;

/// Identifies a registered hook for `unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

struct Registry<H: ?Sized> {
    next_id: AtomicU64,
    hooks: RwLock<Vec<(HookId, Arc<H>)>>,
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            hooks: RwLock::new(Vec::new()),
        }
    }
}

impl<H: ?Sized> Registry<H> {
    fn register(&self, hook: Arc<H>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().push((id, hook));
        id
    }

    fn unregister(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    fn snapshot(&self) -> Vec<Arc<H>> {
        self.hooks.read().iter().map(|(_, hook)| hook.clone()).collect()
    }

    fn len(&self) -> usize {
        self.hooks.read().len()
    }
}

// ── Outgoing requests ─────────────────────────────────────────────────────────

/// What an outgoing-request hook may change about a request.
pub trait OutgoingRequestHookActions {
    /// Write loaded blocks into the named persistence store.
    fn use_persistence_option(&mut self, name: &str);
    /// Decide per link how blocks are interpreted.
    fn use_node_style_chooser(&mut self, chooser: Arc<dyn NodeStyleChooser>);
}

pub type OutgoingRequestHook =
    dyn Fn(PeerId, &GraphSyncRequest, &mut dyn OutgoingRequestHookActions) + Send + Sync;

/// Final selections after every outgoing-request hook has run.
#[derive(Clone)]
pub struct RequestHookResult {
    pub persistence_option: String,
    pub chooser: Option<Arc<dyn NodeStyleChooser>>,
}

impl Default for RequestHookResult {
    fn default() -> Self {
        Self {
            persistence_option: DEFAULT_PERSISTENCE_OPTION.to_string(),
            chooser: None,
        }
    }
}

impl OutgoingRequestHookActions for RequestHookResult {
    fn use_persistence_option(&mut self, name: &str) {
        self.persistence_option = name.to_string();
    }

    fn use_node_style_chooser(&mut self, chooser: Arc<dyn NodeStyleChooser>) {
        self.chooser = Some(chooser);
    }
}

#[derive(Default)]
pub struct RequestHooks {
    registry: Registry<OutgoingRequestHook>,
}

impl RequestHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, hook: F) -> HookId
    where
        F: Fn(PeerId, &GraphSyncRequest, &mut dyn OutgoingRequestHookActions)
            + Send
            + Sync
            + 'static,
    {
        self.registry.register(Arc::new(hook))
    }

    pub fn unregister(&self, id: HookId) -> bool {
        self.registry.unregister(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn process_hooks(&self, peer: PeerId, request: &GraphSyncRequest) -> RequestHookResult {
        let mut result = RequestHookResult::default();
        for hook in self.registry.snapshot() {
            hook(peer, request, &mut result);
        }
        result
    }
}

// ── Incoming responses ────────────────────────────────────────────────────────

/// What an incoming-response hook may do to the request it belongs to.
pub trait IncomingResponseHookActions {
    /// Fail the request with `err`.
    fn terminate_with_error(&mut self, err: anyhow::Error);
    /// Send these extensions to the peer in an update request.
    fn update_request_with_extensions(&mut self, extensions: Vec<ExtensionData>);
}

pub type IncomingResponseHook =
    dyn Fn(PeerId, &GraphSyncResponse, &mut dyn IncomingResponseHookActions) + Send + Sync;

#[derive(Debug, Default)]
pub struct ResponseHookResult {
    /// Last termination requested, if any.
    pub err: Option<anyhow::Error>,
    /// Requested update extensions, one per name.
    pub extensions: Vec<ExtensionData>,
}

impl IncomingResponseHookActions for ResponseHookResult {
    fn terminate_with_error(&mut self, err: anyhow::Error) {
        self.err = Some(err);
    }

    fn update_request_with_extensions(&mut self, extensions: Vec<ExtensionData>) {
        merge_extensions(&mut self.extensions, extensions);
    }
}

#[derive(Default)]
pub struct ResponseHooks {
    registry: Registry<IncomingResponseHook>,
}

impl ResponseHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, hook: F) -> HookId
    where
        F: Fn(PeerId, &GraphSyncResponse, &mut dyn IncomingResponseHookActions)
            + Send
            + Sync
            + 'static,
    {
        self.registry.register(Arc::new(hook))
    }

    pub fn unregister(&self, id: HookId) -> bool {
        self.registry.unregister(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn process_hooks(&self, peer: PeerId, response: &GraphSyncResponse) -> ResponseHookResult {
        let mut result = ResponseHookResult::default();
        for hook in self.registry.snapshot() {
            hook(peer, response, &mut result);
        }
        result
    }
}

/// Fold `updates` into `pending`. An extension with a name already pending
/// replaces it in place.
pub fn merge_extensions(pending: &mut Vec<ExtensionData>, updates: Vec<ExtensionData>) {
    for update in updates {
        match pending.iter_mut().find(|ext| ext.name == update.name) {
            Some(existing) => *existing = update,
            None => pending.push(update),
        }
    }
}
