//! In-memory content-addressed block store.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use dagsync_core::{Block, Link};

/// Cheap to clone; clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    blocks: Arc<DashMap<Link, Bytes>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Self {
        let store = Self::new();
        for block in blocks {
            store.put(block.clone());
        }
        store
    }

    pub fn get(&self, link: &Link) -> Option<Bytes> {
        self.blocks.get(link).map(|entry| entry.value().clone())
    }

    pub fn has(&self, link: &Link) -> bool {
        self.blocks.contains_key(link)
    }

    pub fn put(&self, block: Block) {
        self.blocks.insert(block.link, block.data);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
