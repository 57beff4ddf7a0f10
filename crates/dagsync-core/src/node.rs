//! DAG node codec.
//!
//! A block decodes as a node: an opaque payload plus the links to its
//! children, JSON encoded. Blocks are immutable and addressed by hash, so
//! a node can only link to nodes that already exist.

use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::wire::{Block, Link};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub payload: Bytes,
    pub links: Vec<Link>,
}

impl Node {
    pub fn leaf(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            links: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, NodeError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(NodeError::Encode)
    }

    pub fn decode(data: &[u8]) -> Result<Self, NodeError> {
        serde_json::from_slice(data).map_err(NodeError::Decode)
    }

    pub fn to_block(&self) -> Result<Block, NodeError> {
        Ok(Block::new(self.encode()?))
    }
}

/// A linear chain of nodes, each linking to its predecessor.
///
/// `blocks` is in walk order: the tip first, genesis last.
#[derive(Debug, Clone)]
pub struct Chain {
    pub blocks: Vec<Block>,
}

impl Chain {
    /// Build a chain of `length` nodes with random payloads of `payload_size` bytes.
    pub fn build(length: usize, payload_size: usize) -> Result<Self, NodeError> {
        let mut rng = rand::thread_rng();
        let mut blocks: Vec<Block> = Vec::with_capacity(length);
        for _ in 0..length {
            let mut payload = vec![0u8; payload_size];
            rng.fill_bytes(&mut payload);
            let node = Node {
                payload: Bytes::from(payload),
                links: blocks.last().map(|b| vec![b.link]).unwrap_or_default(),
            };
            blocks.push(node.to_block()?);
        }
        blocks.reverse();
        Ok(Self { blocks })
    }

    /// Root of the chain. Panics on an empty chain.
    pub fn tip(&self) -> Link {
        self.blocks[0].link
    }

    pub fn links(&self) -> Vec<Link> {
        self.blocks.iter().map(|b| b.link).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks `from..to` in walk order.
    pub fn range(&self, from: usize, to: usize) -> &[Block] {
        &self.blocks[from..to]
    }

    /// Blocks `from..` in walk order.
    pub fn remainder(&self, from: usize) -> &[Block] {
        &self.blocks[from..]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("failed to encode node: {0}")]
    Encode(serde_json::Error),
    #[error("block is not a node: {0}")]
    Decode(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_round_trip() {
        let child = Node::leaf(Bytes::from_static(b"leaf")).to_block().unwrap();
        let parent = Node {
            payload: Bytes::from_static(b"parent"),
            links: vec![child.link],
        };
        let block = parent.to_block().unwrap();
        assert_eq!(Node::decode(&block.data).unwrap(), parent);
        assert!(block.link.verify(&block.data));
    }

    #[test]
    fn chain_links_tip_to_genesis() {
        let chain = Chain::build(5, 100).unwrap();
        assert_eq!(chain.len(), 5);
        for pair in chain.blocks.windows(2) {
            let node = Node::decode(&pair[0].data).unwrap();
            assert_eq!(node.links, vec![pair[1].link]);
            assert_eq!(node.payload.len(), 100);
        }
        let genesis = Node::decode(&chain.blocks[4].data).unwrap();
        assert!(genesis.links.is_empty());
        assert_eq!(chain.range(0, 3).len(), 3);
        assert_eq!(chain.remainder(3).len(), 2);
    }

    #[test]
    fn raw_bytes_are_not_a_node() {
        assert!(matches!(
            Node::decode(b"\xff\xfe"),
            Err(NodeError::Decode(_))
        ));
    }
}
