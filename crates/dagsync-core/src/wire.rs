//! dagsync wire model — what peers exchange.
//!
//! A message carries any number of requests, responses, and the raw blocks
//! batched with those responses. Turning these types into bytes is the
//! transport's job; the values here ARE the protocol. Status code numbers
//! must match the peer protocol exactly.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::selector::Selector;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Correlates an outgoing request with every response sent for it.
///
/// Assigned monotonically by the requesting side and never reused while
/// either engine still references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content address of a DAG node: the BLAKE3 hash of the block bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Link(#[serde(with = "hex_serde")] [u8; 32]);

impl Link {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the link addressing `data`.
    pub fn for_data(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True if `data` hashes to this link.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::for_data(data) == *self
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({})", &hex::encode(self.0)[..16])
    }
}

/// Identity of a remote peer: its 32-byte public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(#[serde(with = "hex_serde")] [u8; 32]);

impl PeerId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Random identity, for harnesses and tests.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0[..8]))
    }
}

// ── Blocks ───────────────────────────────────────────────────────────────────

/// Raw block bytes together with the link that addresses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub link: Link,
    pub data: Bytes,
}

impl Block {
    /// Wrap `data`, computing its link.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            link: Link::for_data(&data),
            data,
        }
    }

    /// Wrap `data` under a known link, rejecting bytes that don't hash to it.
    pub fn with_link(link: Link, data: Bytes) -> Result<Self, WireError> {
        let actual = Link::for_data(&data);
        if actual != link {
            return Err(WireError::LinkMismatch {
                expected: link,
                actual,
            });
        }
        Ok(Self { link, data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ── Extensions ───────────────────────────────────────────────────────────────

/// Reserved extension carrying the per-link block presence table of a response.
pub const EXTENSION_METADATA: &str = "graphsync/response-metadata";

/// A named opaque payload attached to a request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionData {
    pub name: String,
    pub data: Bytes,
}

impl ExtensionData {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

fn find_extension<'a>(extensions: &'a [ExtensionData], name: &str) -> Option<&'a Bytes> {
    extensions.iter().find(|e| e.name == name).map(|e| &e.data)
}

// ── Status codes ─────────────────────────────────────────────────────────────

/// Response status, as carried on the wire.
///
///   10-19: informational, the request is still in flight
///   20-29: terminal success
///   30-39: terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResponseStatusCode {
    RequestAcknowledged = 10,
    AdditionalPeers = 11,
    NotEnoughGas = 12,
    OtherProtocol = 13,
    PartialResponse = 14,
    RequestPaused = 15,

    RequestCompletedFull = 20,
    RequestCompletedPartial = 21,

    RequestRejected = 30,
    RequestFailedBusy = 31,
    RequestFailedUnknown = 32,
    RequestFailedLegal = 33,
    RequestFailedContentNotFound = 34,
    RequestCancelled = 35,
}

impl ResponseStatusCode {
    /// No further responses follow for this request.
    pub fn is_terminal(self) -> bool {
        self as i32 >= 20
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::RequestCompletedFull | Self::RequestCompletedPartial
        )
    }

    pub fn is_failure(self) -> bool {
        self as i32 >= 30
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RequestAcknowledged => "RequestAcknowledged",
            Self::AdditionalPeers => "AdditionalPeers",
            Self::NotEnoughGas => "NotEnoughGas",
            Self::OtherProtocol => "OtherProtocol",
            Self::PartialResponse => "PartialResponse",
            Self::RequestPaused => "RequestPaused",
            Self::RequestCompletedFull => "RequestCompletedFull",
            Self::RequestCompletedPartial => "RequestCompletedPartial",
            Self::RequestRejected => "RequestRejected",
            Self::RequestFailedBusy => "RequestFailedBusy",
            Self::RequestFailedUnknown => "RequestFailedUnknown",
            Self::RequestFailedLegal => "RequestFailedLegal",
            Self::RequestFailedContentNotFound => "RequestFailedContentNotFound",
            Self::RequestCancelled => "RequestCancelled",
        }
    }
}

impl fmt::Display for ResponseStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), *self as i32)
    }
}

impl TryFrom<i32> for ResponseStatusCode {
    type Error = WireError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        use ResponseStatusCode::*;
        Ok(match value {
            10 => RequestAcknowledged,
            11 => AdditionalPeers,
            12 => NotEnoughGas,
            13 => OtherProtocol,
            14 => PartialResponse,
            15 => RequestPaused,
            20 => RequestCompletedFull,
            21 => RequestCompletedPartial,
            30 => RequestRejected,
            31 => RequestFailedBusy,
            32 => RequestFailedUnknown,
            33 => RequestFailedLegal,
            34 => RequestFailedContentNotFound,
            35 => RequestCancelled,
            other => return Err(WireError::UnknownStatus(other)),
        })
    }
}

impl From<ResponseStatusCode> for i32 {
    fn from(code: ResponseStatusCode) -> i32 {
        code as i32
    }
}

// ── Requests ─────────────────────────────────────────────────────────────────

pub type Priority = i32;

/// Priority given to new requests unless configured otherwise.
pub const DEFAULT_PRIORITY: Priority = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Opens a request: carries root, selector and priority.
    New,
    /// Echoes extension updates for an in-flight request.
    Update,
    /// Tells the responder to stop serving a request.
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphSyncRequest {
    id: RequestId,
    kind: RequestKind,
    root: Option<Link>,
    selector: Option<Selector>,
    priority: Priority,
    extensions: Vec<ExtensionData>,
}

impl GraphSyncRequest {
    pub fn new(
        id: RequestId,
        root: Link,
        selector: Selector,
        priority: Priority,
        extensions: Vec<ExtensionData>,
    ) -> Self {
        Self {
            id,
            kind: RequestKind::New,
            root: Some(root),
            selector: Some(selector),
            priority,
            extensions,
        }
    }

    pub fn cancel(id: RequestId) -> Self {
        Self {
            id,
            kind: RequestKind::Cancel,
            root: None,
            selector: None,
            priority: DEFAULT_PRIORITY,
            extensions: Vec::new(),
        }
    }

    pub fn update(id: RequestId, extensions: Vec<ExtensionData>) -> Self {
        Self {
            id,
            kind: RequestKind::Update,
            root: None,
            selector: None,
            priority: DEFAULT_PRIORITY,
            extensions,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn is_cancel(&self) -> bool {
        self.kind == RequestKind::Cancel
    }

    pub fn is_update(&self) -> bool {
        self.kind == RequestKind::Update
    }

    /// Root link. `None` for update and cancel requests.
    pub fn root(&self) -> Option<Link> {
        self.root
    }

    /// Selector. `None` for update and cancel requests.
    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn extensions(&self) -> &[ExtensionData] {
        &self.extensions
    }

    pub fn extension(&self, name: &str) -> Option<&Bytes> {
        find_extension(&self.extensions, name)
    }
}

// ── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct GraphSyncResponse {
    id: RequestId,
    status: ResponseStatusCode,
    extensions: Vec<ExtensionData>,
}

impl GraphSyncResponse {
    pub fn new(id: RequestId, status: ResponseStatusCode, extensions: Vec<ExtensionData>) -> Self {
        Self {
            id,
            status,
            extensions,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn status(&self) -> ResponseStatusCode {
        self.status
    }

    pub fn extensions(&self) -> &[ExtensionData] {
        &self.extensions
    }

    pub fn extension(&self, name: &str) -> Option<&Bytes> {
        find_extension(&self.extensions, name)
    }
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// One unit of transmission between two peers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSyncMessage {
    pub requests: Vec<GraphSyncRequest>,
    pub responses: Vec<GraphSyncResponse>,
    pub blocks: Vec<Block>,
}

impl GraphSyncMessage {
    pub fn with_request(request: GraphSyncRequest) -> Self {
        Self {
            requests: vec![request],
            ..Self::default()
        }
    }

    pub fn with_responses(responses: Vec<GraphSyncResponse>, blocks: Vec<Block>) -> Self {
        Self {
            requests: Vec::new(),
            responses,
            blocks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.responses.is_empty() && self.blocks.is_empty()
    }

    /// Summed payload bytes of the attached blocks.
    pub fn block_bytes(&self) -> u64 {
        self.blocks.iter().map(|b| b.len() as u64).sum()
    }
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Default cap on cumulative block payload bytes in one outgoing response message.
/// A single block larger than this is still sent, alone.
pub const MAX_BLOCK_BATCH_BYTES: u64 = 512 * 1024;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown response status code: {0}")]
    UnknownStatus(i32),

    #[error("block data hashes to {actual}, expected {expected}")]
    LinkMismatch { expected: Link, actual: Link },
}

mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("expected 32 bytes"));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
