//! Boundary with the remote content service
//!
//! The engine never speaks the wire protocol itself. Everything it needs
//! from the service (connecting to a datacenter, resolving peers and
//! messages, streaming bytes in either direction) goes through the
//! [`Transport`] trait, implemented by the embedding application.

use crate::iter::forward::ForwardElem;
use crate::iter::upload::UploadElem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Backend datacenter identifier
pub type DcId = i32;

/// Message identifier within a conversation
pub type MessageId = i32;

/// Session flavour of an endpoint client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    /// Interactive access
    Normal,
    /// Bulk-export (takeout) session with its own rate limits
    Bulk,
}

impl fmt::Display for ClientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMode::Normal => f.write_str("normal"),
            ClientMode::Bulk => f.write_str("bulk"),
        }
    }
}

/// Identity of a conversation as given by the user
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerRef(pub i64);

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conversation resolved by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandle {
    /// Stable numeric peer id
    pub id: i64,
    /// Display name, if the service knows one
    pub name: Option<String>,
}

/// Opaque handle the service uses to locate a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location(pub Vec<u8>);

/// Transferable media attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Original file name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Datacenter holding the bytes
    pub dc: DcId,
    /// Service-specific location
    pub location: Location,
}

/// A message fetched from the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message id
    pub id: MessageId,
    /// Send time (Unix seconds)
    pub date: i64,
    /// Author peer id, when the service exposes it
    pub author_id: Option<i64>,
    /// Media payload, if any
    pub media: Option<MediaDescriptor>,
}

/// Errors reported by the transport collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The operation observed cancellation
    #[error("operation cancelled")]
    Cancelled,

    /// Requested object does not exist (anymore)
    #[error("not found: {0}")]
    NotFound(String),

    /// Access to the object was denied
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Connection or protocol failure
    #[error("network error: {0}")]
    NetworkError(String),

    /// Local IO failure while streaming
    #[error("IO error: {0}")]
    IoError(String),
}

impl TransportError {
    /// Whether this error stems from cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::IoError(e.to_string())
    }
}

/// Positional writer the download primitive fills in parallel
pub trait WriteAt: Send + Sync {
    /// Write `buf` at byte `offset`, returning the number of bytes written
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;
}

/// The remote service as seen by the engine
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Authenticated client bound to one datacenter and mode
    type Client: Send + Sync + 'static;

    /// Construct a client for `dc` in `mode`
    async fn connect(&self, dc: DcId, mode: ClientMode) -> Result<Self::Client, TransportError>;

    /// Resolve a user-supplied peer reference
    async fn resolve_peer(&self, peer: &PeerRef) -> Result<PeerHandle, TransportError>;

    /// Fetch one message; fails if it no longer exists or access is denied
    async fn resolve_message(
        &self,
        client: &Self::Client,
        peer: &PeerHandle,
        id: MessageId,
    ) -> Result<Message, TransportError>;

    /// Extract the transferable media of a message
    fn extract_media(&self, message: &Message) -> Option<MediaDescriptor> {
        message.media.clone()
    }

    /// Stream the file at `location` into `sink`
    async fn download(
        &self,
        client: &Self::Client,
        location: &Location,
        sink: &dyn WriteAt,
        part_size: usize,
        threads: usize,
    ) -> Result<(), TransportError>;

    /// Upload a local file to `elem.to`
    async fn push(&self, client: &Self::Client, elem: &UploadElem) -> Result<(), TransportError>;

    /// Forward one message
    async fn forward(&self, client: &Self::Client, elem: &ForwardElem) -> Result<(), TransportError>;
}
