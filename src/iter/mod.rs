//! Work iterators
//!
//! Turn heterogeneous work sources into a pull-based stream the executor can
//! drain. Two shapes exist:
//!
//! - [`ResumableIter`]: random-access, checkpointed sources. The executor
//!   claims a [`Position`] under a short lock, then resolves it to a
//!   [`WorkItem`] outside the lock. Completed ids are recorded with
//!   [`ResumableIter::finish`] and survive restarts.
//! - [`LinearIter`]: strictly sequential, uncheckpointed sources (uploads,
//!   forwards). Any failure ends the stream and is reported by `err()`.

pub mod download;
pub mod filter;
pub mod forward;
pub mod template;
pub mod upload;

pub use download::{DownloadIter, DownloadOptions, Group};
pub use filter::ExtFilter;
pub use forward::{ForwardElem, ForwardIter, ForwardMode, ForwardOptions, ForwardSource};
pub use template::{NameContext, NameTemplate, DEFAULT_TEMPLATE};
pub use upload::{OpenedFile, UploadElem, UploadFile, UploadIter, UploadOptions};

use crate::kv::KvError;
use crate::resume::{FinishedSet, ResumeError};
use crate::transport::{DcId, Location, MessageId, PeerRef, TransportError};
use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Per-item iterator outcomes other than a resolved item
#[derive(Debug, Clone, thiserror::Error)]
pub enum IterError {
    /// Item needs no transfer (already finished, filtered, or no media)
    #[error("item skipped")]
    Skip,

    /// All positions have been claimed
    #[error("no more items")]
    Exhausted,

    /// Cancellation was observed
    #[error("iteration cancelled")]
    Cancelled,

    /// Remote lookup for the item failed
    #[error("resolve error: {0}")]
    ResolveError(String),

    /// Destination name could not be rendered
    #[error("template error: {0}")]
    TemplateError(String),

    /// Local file could not be opened
    #[error("IO error: {0}")]
    IoError(String),

    /// Thumbnail is missing or not an image
    #[error("invalid thumbnail {path}: {reason}")]
    InvalidThumbnail {
        /// Thumbnail path
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// Finished set could not be persisted
    #[error("checkpoint error: {0}")]
    CheckpointError(String),
}

impl IterError {
    /// Whether this outcome is a skip rather than a failure
    pub fn is_skip(&self) -> bool {
        matches!(self, IterError::Skip)
    }

    /// Whether this error stems from cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IterError::Cancelled)
    }
}

impl From<TransportError> for IterError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => IterError::Cancelled,
            other => IterError::ResolveError(other.to_string()),
        }
    }
}

impl From<ResumeError> for IterError {
    fn from(e: ResumeError) -> Self {
        IterError::CheckpointError(e.to_string())
    }
}

/// Errors that prevent a session from being set up at all
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No group carries any reference
    #[error("at least one message must be specified")]
    EmptySource,

    /// Destination template failed to parse
    #[error("invalid name template: {0}")]
    Template(String),

    /// A group's peer could not be resolved
    #[error("failed to resolve peer {peer}: {source}")]
    ResolvePeer {
        /// Peer as given by the caller
        peer: PeerRef,
        /// Transport failure
        #[source]
        source: TransportError,
    },

    /// Stored session cannot be applied (fingerprint or schema mismatch)
    #[error("resume error: {0}")]
    Resume(#[from] ResumeError),

    /// Checkpoint store failure
    #[error("store error: {0}")]
    Store(#[from] KvError),

    /// Setup was cancelled
    #[error("session setup cancelled")]
    Cancelled,
}

/// Cursor location of one reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    /// Group index in iteration order
    pub group: usize,
    /// Reference index within the group
    pub index: usize,
}

/// A resolved transfer unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Stable id, `pre_sum[group] + index`
    pub id: usize,
    /// Conversation the message belongs to
    pub peer: i64,
    /// Message carrying the media
    pub message: MessageId,
    /// Datacenter holding the bytes
    pub dc: DcId,
    /// Size in bytes
    pub size: u64,
    /// Service-specific file location
    pub location: Location,
    /// Original file name
    pub file_name: String,
    /// Rendered destination name
    pub name: String,
    /// Fetch through the bulk (takeout) client
    pub bulk: bool,
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(#{} {}/{})", self.name, self.id, self.peer, self.message)
    }
}

/// Random-access, checkpointed work source
#[async_trait]
pub trait ResumableIter: Send + Sync {
    /// Advance the cursor by one position; `None` once exhausted
    fn claim(&self) -> Option<Position>;

    /// Turn a claimed position into a work item
    async fn resolve(
        &self,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<WorkItem, IterError>;

    /// Claim and resolve the next item
    async fn next(&self, cancel: &CancellationToken) -> Result<WorkItem, IterError> {
        if cancel.is_cancelled() {
            return Err(IterError::Cancelled);
        }
        let position = self.claim().ok_or(IterError::Exhausted)?;
        self.resolve(position, cancel).await
    }

    /// Stable id of a position
    fn id_of(&self, position: Position) -> usize;

    /// Record `id` as transferred and persist it
    async fn finish(&self, id: usize) -> Result<(), IterError>;

    /// Number of positions in the session
    fn total(&self) -> usize;

    /// Digest of the id layout
    fn fingerprint(&self) -> &str;

    /// Replace the finished set
    fn set_finished(&self, finished: FinishedSet);

    /// Snapshot of the finished set
    fn finished(&self) -> FinishedSet;
}

/// Strictly sequential work source
#[async_trait]
pub trait LinearIter: Send {
    /// Element produced by the source
    type Item: Send + 'static;

    /// Prepare the next element; `false` on exhaustion or failure
    async fn next(&mut self, cancel: &CancellationToken) -> bool;

    /// Take the element prepared by the last successful `next`
    fn value(&mut self) -> Option<Self::Item>;

    /// Terminal error, if iteration stopped because of one
    fn err(&self) -> Option<&IterError>;
}
