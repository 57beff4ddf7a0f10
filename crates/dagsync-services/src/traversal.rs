//! Step-wise DAG traversal driven by a selector.
//!
//! The traversal never loads blocks itself. The caller asks for the current
//! link, fetches its bytes however it likes, and feeds them back through
//! `advance`. Both the requesting and the serving side walk with the same
//! cursor, so they visit links in the same order.

use std::sync::Arc;

use bytes::Bytes;

use dagsync_core::node::NodeError;
use dagsync_core::{Link, Node, Selector};

/// How a block is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStyle {
    /// Decode as a node and follow its links.
    Dag,
    /// Opaque bytes. Never descended into.
    Raw,
}

/// Picks a node style per link.
pub trait NodeStyleChooser: Send + Sync {
    fn choose(&self, link: &Link, depth: u32) -> NodeStyle;
}

impl<F> NodeStyleChooser for F
where
    F: Fn(&Link, u32) -> NodeStyle + Send + Sync,
{
    fn choose(&self, link: &Link, depth: u32) -> NodeStyle {
        self(link, depth)
    }
}

/// One node the traversal has accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitedNode {
    pub link: Link,
    pub depth: u32,
    pub style: NodeStyle,
}

#[derive(Debug, thiserror::Error)]
pub enum TraversalError {
    #[error("block {link} could not be decoded: {source}")]
    Decode {
        link: Link,
        #[source]
        source: NodeError,
    },

    #[error("traversal already finished")]
    Finished,
}

pub trait Traversal: Send {
    /// Link to load next, or `None` when the walk is done.
    fn current_link(&self) -> Option<Link>;

    /// Accept the bytes for the current link and move on.
    fn advance(&mut self, data: &Bytes) -> Result<VisitedNode, TraversalError>;

    /// Move past the current link without visiting it.
    fn skip_current(&mut self);
}

pub trait TraversalBuilder: Send + Sync {
    fn begin(
        &self,
        root: Link,
        selector: &Selector,
        chooser: Option<Arc<dyn NodeStyleChooser>>,
    ) -> Box<dyn Traversal>;
}

/// Builds depth-first [`SelectorTraversal`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorTraversalBuilder;

impl TraversalBuilder for SelectorTraversalBuilder {
    fn begin(
        &self,
        root: Link,
        selector: &Selector,
        chooser: Option<Arc<dyn NodeStyleChooser>>,
    ) -> Box<dyn Traversal> {
        Box::new(SelectorTraversal::new(root, selector.clone(), chooser))
    }
}

pub struct SelectorTraversal {
    /// (link, depth), next to visit on top
    stack: Vec<(Link, u32)>,
    selector: Selector,
    chooser: Option<Arc<dyn NodeStyleChooser>>,
}

impl SelectorTraversal {
    pub fn new(root: Link, selector: Selector, chooser: Option<Arc<dyn NodeStyleChooser>>) -> Self {
        Self {
            stack: vec![(root, 0)],
            selector,
            chooser,
        }
    }

    fn style_for(&self, link: &Link, depth: u32) -> NodeStyle {
        self.chooser
            .as_ref()
            .map_or(NodeStyle::Dag, |chooser| chooser.choose(link, depth))
    }
}

impl Traversal for SelectorTraversal {
    fn current_link(&self) -> Option<Link> {
        self.stack.last().map(|(link, _)| *link)
    }

    fn advance(&mut self, data: &Bytes) -> Result<VisitedNode, TraversalError> {
        let (link, depth) = self.stack.pop().ok_or(TraversalError::Finished)?;
        let style = self.style_for(&link, depth);

        if style == NodeStyle::Dag {
            let node = Node::decode(data).map_err(|source| TraversalError::Decode { link, source })?;
            if self.selector.descends_from(depth) {
                // Reversed so the first link is visited first.
                self.stack
                    .extend(node.links.iter().rev().map(|child| (*child, depth + 1)));
            }
        }

        Ok(VisitedNode { link, depth, style })
    }

    fn skip_current(&mut self) {
        self.stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagsync_core::{Block, Chain};
    use std::collections::HashMap;

    fn walk(traversal: &mut dyn Traversal, blocks: &HashMap<Link, Bytes>) -> Vec<VisitedNode> {
        let mut visited = Vec::new();
        while let Some(link) = traversal.current_link() {
            match blocks.get(&link) {
                Some(data) => visited.push(traversal.advance(data).unwrap()),
                None => traversal.skip_current(),
            }
        }
        visited
    }

    fn index(blocks: &[Block]) -> HashMap<Link, Bytes> {
        blocks.iter().map(|b| (b.link, b.data.clone())).collect()
    }

    #[test]
    fn explores_whole_chain_in_order() {
        let chain = Chain::build(10, 32).unwrap();
        let mut t = SelectorTraversalBuilder.begin(chain.tip(), &Selector::explore_all(), None);
        let visited = walk(t.as_mut(), &index(&chain.blocks));
        let links: Vec<Link> = visited.iter().map(|v| v.link).collect();
        assert_eq!(links, chain.links());
        assert_eq!(visited.last().unwrap().depth, 9);
    }

    #[test]
    fn root_only_and_depth_limit() {
        let chain = Chain::build(10, 8).unwrap();
        let blocks = index(&chain.blocks);

        let mut t = SelectorTraversalBuilder.begin(chain.tip(), &Selector::RootOnly, None);
        assert_eq!(walk(t.as_mut(), &blocks).len(), 1);

        let selector = Selector::ExploreAll { max_depth: Some(3) };
        let mut t = SelectorTraversalBuilder.begin(chain.tip(), &selector, None);
        assert_eq!(walk(t.as_mut(), &blocks).len(), 4);
    }

    #[test]
    fn depth_first_over_branches() {
        let a = Node::leaf(&b"a"[..]).to_block().unwrap();
        let b = Node::leaf(&b"b"[..]).to_block().unwrap();
        let left = Node {
            payload: Bytes::from_static(b"left"),
            links: vec![a.link],
        }
        .to_block()
        .unwrap();
        let root = Node {
            payload: Bytes::from_static(b"root"),
            links: vec![left.link, b.link],
        }
        .to_block()
        .unwrap();
        let blocks = index(&[root.clone(), left.clone(), a.clone(), b.clone()]);

        let mut t = SelectorTraversalBuilder.begin(root.link, &Selector::explore_all(), None);
        let order: Vec<Link> = walk(t.as_mut(), &blocks).iter().map(|v| v.link).collect();
        assert_eq!(order, vec![root.link, left.link, a.link, b.link]);
    }

    #[test]
    fn raw_style_is_a_leaf() {
        let chain = Chain::build(3, 8).unwrap();
        let chooser: Arc<dyn NodeStyleChooser> = Arc::new(|_: &Link, _: u32| NodeStyle::Raw);
        let mut t =
            SelectorTraversalBuilder.begin(chain.tip(), &Selector::explore_all(), Some(chooser));
        let visited = walk(t.as_mut(), &index(&chain.blocks));
        assert_eq!(visited.len(), 1);
        assert_eq!(visited[0].style, NodeStyle::Raw);
    }

    #[test]
    fn undecodable_block_is_an_error() {
        let junk = Block::new(Bytes::from_static(b"not a node"));
        let mut t = SelectorTraversalBuilder.begin(junk.link, &Selector::explore_all(), None);
        assert!(matches!(
            t.advance(&junk.data),
            Err(TraversalError::Decode { link, .. }) if link == junk.link
        ));
        assert!(t.current_link().is_none());
        assert!(matches!(t.advance(&junk.data), Err(TraversalError::Finished)));
    }
}
