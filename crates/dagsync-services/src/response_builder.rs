//! Response builder — accumulates one outgoing response message.
//!
//! Records for any number of requests collect here until the send loop
//! drains the builder into a single message: one `GraphSyncResponse` per
//! request touched (first-touched order) plus the raw blocks attached so far.

use std::collections::HashMap;

use dagsync_core::metadata::{encode_metadata, Metadata, MetadataError, MetadataItem};
use dagsync_core::wire::EXTENSION_METADATA;
use dagsync_core::{Block, ExtensionData, GraphSyncResponse, Link, RequestId, ResponseStatusCode};

#[derive(Debug, Default)]
struct PendingResponse {
    status: Option<ResponseStatusCode>,
    links: Metadata,
    extensions: Vec<ExtensionData>,
}

#[derive(Debug, Default)]
pub struct ResponseBuilder {
    order: Vec<RequestId>,
    pending: HashMap<RequestId, PendingResponse>,
    blocks: Vec<Block>,
    block_size: u64,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, request_id: RequestId) -> &mut PendingResponse {
        if !self.pending.contains_key(&request_id) {
            self.order.push(request_id);
        }
        self.pending.entry(request_id).or_default()
    }

    /// Record a status for the request. A later status replaces an earlier one.
    pub fn add_response_code(&mut self, request_id: RequestId, status: ResponseStatusCode) {
        self.entry(request_id).status = Some(status);
    }

    /// Record that the request traversed `link`, with or without its block.
    pub fn add_link(&mut self, request_id: RequestId, link: Link, block_present: bool) {
        self.entry(request_id).links.push(MetadataItem {
            link,
            block_present,
        });
    }

    pub fn add_extension_data(&mut self, request_id: RequestId, extension: ExtensionData) {
        self.entry(request_id).extensions.push(extension);
    }

    pub fn add_block(&mut self, block: Block) {
        self.block_size += block.len() as u64;
        self.blocks.push(block);
    }

    /// Summed payload bytes of the attached blocks.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.blocks.is_empty()
    }

    /// Assemble the message contents.
    pub fn build(mut self) -> Result<(Vec<GraphSyncResponse>, Vec<Block>), BuildError> {
        if self.pending.is_empty() && !self.blocks.is_empty() {
            return Err(BuildError::BlocksWithoutResponses(self.blocks.len()));
        }

        let mut responses = Vec::with_capacity(self.order.len());
        for request_id in self.order {
            let Some(pending) = self.pending.remove(&request_id) else {
                continue;
            };
            let mut extensions = Vec::with_capacity(pending.extensions.len() + 1);
            extensions.push(ExtensionData::new(
                EXTENSION_METADATA,
                encode_metadata(&pending.links)?,
            ));
            extensions.extend(pending.extensions);
            let status = pending
                .status
                .unwrap_or(ResponseStatusCode::PartialResponse);
            responses.push(GraphSyncResponse::new(request_id, status, extensions));
        }
        Ok((responses, self.blocks))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{0} blocks queued with no response records")]
    BlocksWithoutResponses(usize),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use dagsync_core::metadata::decode_metadata;

    fn block(fill: u8, len: usize) -> Block {
        Block::new(Bytes::from(vec![fill; len]))
    }

    fn metadata_of(response: &GraphSyncResponse) -> Metadata {
        decode_metadata(response.extension(EXTENSION_METADATA).unwrap()).unwrap()
    }

    #[test]
    fn empty_builder() {
        let builder = ResponseBuilder::new();
        assert!(builder.is_empty());
        assert_eq!(builder.block_size(), 0);
        let (responses, blocks) = builder.build().unwrap();
        assert!(responses.is_empty());
        assert!(blocks.is_empty());
    }

    #[test]
    fn builds_one_response_per_request_in_first_touched_order() {
        let b1 = block(1, 10);
        let b2 = block(2, 20);
        let mut builder = ResponseBuilder::new();

        builder.add_block(b1.clone());
        builder.add_link(RequestId(2), b1.link, true);
        builder.add_link(RequestId(1), b2.link, false);
        builder.add_extension_data(RequestId(1), ExtensionData::new("app/x", Bytes::from_static(b"x")));
        builder.add_response_code(RequestId(2), ResponseStatusCode::RequestCompletedFull);
        builder.add_block(b2.clone());
        builder.add_link(RequestId(1), b2.link, true);

        assert!(!builder.is_empty());
        assert_eq!(builder.block_size(), 30);

        let (responses, blocks) = builder.build().unwrap();
        assert_eq!(blocks, vec![b1.clone(), b2.clone()]);
        assert_eq!(responses.len(), 2);

        assert_eq!(responses[0].id(), RequestId(2));
        assert_eq!(responses[0].status(), ResponseStatusCode::RequestCompletedFull);
        assert_eq!(metadata_of(&responses[0]).len(), 1);

        assert_eq!(responses[1].id(), RequestId(1));
        assert_eq!(responses[1].status(), ResponseStatusCode::PartialResponse);
        let md = metadata_of(&responses[1]);
        assert_eq!(md.len(), 2);
        assert!(!md[0].block_present);
        assert!(md[1].block_present);
        assert_eq!(responses[1].extension("app/x").unwrap().as_ref(), b"x");
    }

    #[test]
    fn status_only_response_still_carries_metadata() {
        let mut builder = ResponseBuilder::new();
        builder.add_response_code(RequestId(5), ResponseStatusCode::RequestPaused);
        let (responses, _) = builder.build().unwrap();
        assert_eq!(responses[0].status(), ResponseStatusCode::RequestPaused);
        assert!(metadata_of(&responses[0]).is_empty());
    }

    #[test]
    fn blocks_without_records_is_inconsistent() {
        let mut builder = ResponseBuilder::new();
        builder.add_block(block(9, 4));
        assert!(matches!(
            builder.build(),
            Err(BuildError::BlocksWithoutResponses(1))
        ));
    }
}
