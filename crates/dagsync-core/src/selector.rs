//! Selectors — which part of a DAG a request asks for.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selector {
    /// Only the root block.
    RootOnly,

    /// Depth-first walk over every link reachable from the root.
    /// `max_depth` bounds how many links deep the walk descends; the root
    /// is depth 0. `None` walks the whole graph.
    ExploreAll { max_depth: Option<u32> },
}

impl Selector {
    /// Walk everything reachable from the root.
    pub fn explore_all() -> Self {
        Self::ExploreAll { max_depth: None }
    }

    /// May the walk follow links out of a node at `depth`?
    pub fn descends_from(&self, depth: u32) -> bool {
        match self {
            Self::RootOnly => false,
            Self::ExploreAll { max_depth: None } => true,
            Self::ExploreAll {
                max_depth: Some(max),
            } => depth < *max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_limits() {
        assert!(!Selector::RootOnly.descends_from(0));
        assert!(Selector::explore_all().descends_from(1_000));
        let limited = Selector::ExploreAll { max_depth: Some(2) };
        assert!(limited.descends_from(1));
        assert!(!limited.descends_from(2));
    }

    #[test]
    fn serde_tagged_form() {
        let json = serde_json::to_string(&Selector::ExploreAll { max_depth: Some(3) }).unwrap();
        assert_eq!(json, r#"{"type":"explore_all","max_depth":3}"#);
        let back: Selector = serde_json::from_str(r#"{"type":"root_only"}"#).unwrap();
        assert_eq!(back, Selector::RootOnly);
    }
}
