//! Transfer orchestration
//!
//! This module drains work iterators through a bounded pool of transfer
//! units.
//!
//! # Overview
//!
//! 1. **Source**: a [`crate::iter::ResumableIter`] (downloads) or a
//!    [`crate::iter::LinearIter`] (uploads, forwards)
//! 2. **Handler**: an [`ItemHandler`] moving one item through the
//!    [`crate::pool::ConnectionPool`]
//! 3. **Execution**: [`Executor::run_resumable`] / [`Executor::run_linear`]
//! 4. **Progress**: a [`Progress`] sink plus [`RunStats`] counters
//!
//! # Quick Start
//!
//! ```no_run
//! use courier::engine::{self, EngineConfig};
//! use courier::iter::{DownloadOptions, Group};
//! use courier::kv::{Registry, StorageOptions};
//! use courier::pool::ConnectionPool;
//! use courier::shutdown::ShutdownCoordinator;
//! use courier::transport::{PeerRef, Transport};
//! use std::sync::Arc;
//!
//! # async fn example<T: Transport>(transport: T) -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Registry::builtin().open_with_map(
//!     &StorageOptions::parse("type=file,path=./courier.json")?,
//! )?;
//! let pool = Arc::new(ConnectionPool::new(Arc::new(transport), 2));
//! let opts = DownloadOptions::new(vec![Group::new(PeerRef(1001), vec![1, 2, 3])]);
//! let shutdown = ShutdownCoordinator::install();
//!
//! let summary = engine::download(
//!     pool,
//!     opts,
//!     &storage,
//!     "./downloads",
//!     EngineConfig::default(),
//!     &shutdown.token(),
//! )
//! .await?;
//! println!("{} files downloaded", summary.succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! - Item failures ([`TransferError`]) are reported to the progress sink and
//!   never stop the run
//! - Cancellation anywhere stops the run with [`RunError::Cancelled`]
//! - Setup problems surface as [`crate::iter::SessionError`]

pub mod config;
pub mod executor;
pub mod handler;
pub mod progress;
pub mod sink;

pub use config::{best_threads, EngineConfig, DEFAULT_CONCURRENCY, DEFAULT_PART_SIZE, DEFAULT_THREADS};
pub use executor::Executor;
pub use handler::{DownloadHandler, ForwardHandler, ItemHandler, UploadHandler};
pub use progress::{LogProgress, NoProgress, Progress, ProgressState, RunStats, RunSummary};

use crate::iter::{DownloadIter, DownloadOptions, IterError, ResumableIter, SessionError};
use crate::kv::SharedStorage;
use crate::pool::{ConnectionPool, PoolError};
use crate::transport::{Transport, TransportError};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Errors of a single transfer
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    /// The transfer observed cancellation
    #[error("transfer cancelled")]
    Cancelled,

    /// No client for the item's datacenter
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// The transfer primitive failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local file handling failed
    #[error("IO error: {0}")]
    IoError(String),

    /// The item was transferred but could not be recorded as finished
    #[error("checkpoint error: {0}")]
    CheckpointError(String),
}

impl TransferError {
    /// Whether this error stems from cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            TransferError::Cancelled => true,
            TransferError::Pool(e) => e.is_cancelled(),
            TransferError::Transport(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        TransferError::IoError(e.to_string())
    }
}

/// Why a run stopped early
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    /// The run was cancelled
    #[error("run cancelled")]
    Cancelled,

    /// The source stopped with an error
    #[error("iterator error: {0}")]
    Iter(IterError),

    /// A transfer task panicked
    #[error("task failed: {0}")]
    Join(String),
}

/// Errors of [`download`]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The session could not be set up
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The run stopped early
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Download every media item of `opts` into `dir`, resuming from `storage`
///
/// Progress is logged through [`LogProgress`]; the returned summary covers
/// this run only.
pub async fn download<T: Transport>(
    pool: Arc<ConnectionPool<T>>,
    opts: DownloadOptions,
    storage: &SharedStorage,
    dir: impl Into<PathBuf>,
    config: EngineConfig,
    cancel: &CancellationToken,
) -> Result<RunSummary, EngineError> {
    let iter = DownloadIter::new(pool.clone(), opts, cancel)
        .await?
        .attach_store(storage)?;
    let remaining = iter.total().saturating_sub(iter.finished().len());

    let executor = Executor::new(DownloadHandler::new(pool, dir, config.clone()))
        .with_progress(Arc::new(LogProgress::new(Some(iter.total() as u64))));
    tracing::info!(total = iter.total(), remaining, "Downloading");
    executor
        .run_resumable(Arc::new(iter), cancel, config.concurrency)
        .await?;
    Ok(executor.stats())
}
