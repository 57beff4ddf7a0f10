//! dagsync-services — the exchange engine.
//!
//! Request side: `request_manager` issues requests and turns response
//! batches into ordered progress through an `AsyncLoader`. Serving side:
//! `responder` walks the local store and hands every link to a per-peer
//! `PeerResponseSender`, which dedups blocks and batches them for the wire.

pub mod blockstore;
pub mod error;
pub mod exchange;
pub mod hooks;
pub mod linktracker;
pub mod loader;
pub mod loopback;
pub mod memory_loader;
pub mod network;
pub mod peer_response_sender;
pub mod request_manager;
pub mod responder;
pub mod response_builder;
pub mod response_senders;
pub mod traversal;

pub use blockstore::MemoryBlockStore;
pub use error::GraphSyncError;
pub use exchange::GraphExchange;
pub use hooks::{HookId, RequestHooks, ResponseHooks};
pub use loader::{AsyncLoader, LoadError};
pub use loopback::{LoopbackNetwork, LoopbackTransport, TransportSnapshot};
pub use memory_loader::MemoryAsyncLoader;
pub use network::{PeerMessageHandler, PeerRequestHandler};
pub use peer_response_sender::{BlockData, PeerResponseSender};
pub use request_manager::{RequestDispatcher, RequestManager, ResponseProgress};
pub use traversal::{NodeStyle, NodeStyleChooser, SelectorTraversalBuilder, TraversalBuilder};
