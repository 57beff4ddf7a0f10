//! Link tracking — which blocks have gone to a peer, and for which requests.
//!
//! One tracker exists per remote peer. It answers two questions for the
//! response sender: "has this block already been queued for this peer"
//! (dedup) and "did this request see every block it traversed" (full vs
//! partial completion). Pure bookkeeping; the owner serializes access.

use std::collections::HashMap;

use dagsync_core::{Link, RequestId};

#[derive(Debug, Default)]
pub struct LinkTracker {
    /// link -> number of traversals that queued it with its block attached
    links_with_blocks: HashMap<Link, usize>,
    /// request -> (link, block present) in traversal order
    traversals: HashMap<RequestId, Vec<(Link, bool)>>,
}

impl LinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `request_id` traversed `link`, with or without its block.
    pub fn record_link_traversal(&mut self, request_id: RequestId, link: Link, block_present: bool) {
        self.traversals
            .entry(request_id)
            .or_default()
            .push((link, block_present));
        if block_present {
            *self.links_with_blocks.entry(link).or_default() += 1;
        }
    }

    /// How many live traversals queued `link` with its block attached.
    /// Zero means the block has not been sent to this peer by any open request.
    pub fn block_ref_count(&self, link: &Link) -> usize {
        self.links_with_blocks.get(link).copied().unwrap_or(0)
    }

    /// Drop all bookkeeping for `request_id`, releasing its block references.
    /// Returns true if every link the request traversed had its block present.
    pub fn finish_request(&mut self, request_id: RequestId) -> bool {
        let Some(links) = self.traversals.remove(&request_id) else {
            return true;
        };

        let mut all_present = true;
        for (link, present) in links {
            if !present {
                all_present = false;
                continue;
            }
            if let Some(count) = self.links_with_blocks.get_mut(&link) {
                *count -= 1;
                if *count == 0 {
                    self.links_with_blocks.remove(&link);
                }
            }
        }
        all_present
    }

    /// Requests with open bookkeeping.
    pub fn open_requests(&self) -> usize {
        self.traversals.len()
    }
}
