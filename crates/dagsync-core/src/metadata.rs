//! Response metadata — the per-link block presence table.
//!
//! Every response carries the links the responder traversed for that request,
//! in traversal order, and whether the block for each link was available.
//! The table travels in the reserved `EXTENSION_METADATA` extension, JSON
//! encoded, so the requester can tell "block is in this message (or an earlier
//! one)" apart from "responder doesn't have it".

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::wire::Link;

/// One traversed link and whether its block was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub link: Link,
    #[serde(rename = "blockPresent")]
    pub block_present: bool,
}

pub type Metadata = Vec<MetadataItem>;

/// Build a table marking every link with the same presence flag.
pub fn metadata_for(links: impl IntoIterator<Item = Link>, block_present: bool) -> Metadata {
    links
        .into_iter()
        .map(|link| MetadataItem {
            link,
            block_present,
        })
        .collect()
}

pub fn encode_metadata(metadata: &[MetadataItem]) -> Result<Bytes, MetadataError> {
    serde_json::to_vec(metadata)
        .map(Bytes::from)
        .map_err(MetadataError::Encode)
}

/// Decode a presence table. An empty payload is an empty table.
pub fn decode_metadata(data: &[u8]) -> Result<Metadata, MetadataError> {
    if data.is_empty() {
        return Ok(Metadata::new());
    }
    serde_json::from_slice(data).map_err(MetadataError::Decode)
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("failed to encode metadata: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode metadata: {0}")]
    Decode(serde_json::Error),
}
