//! dagsync-core — shared wire types, codecs, and configuration.
//! All other dagsync crates depend on this one.

pub mod config;
pub mod metadata;
pub mod node;
pub mod selector;
pub mod wire;

pub use metadata::{Metadata, MetadataItem};
pub use node::{Chain, Node};
pub use selector::Selector;
pub use wire::{
    Block, ExtensionData, GraphSyncMessage, GraphSyncRequest, GraphSyncResponse, Link, PeerId,
    RequestId, ResponseStatusCode,
};
