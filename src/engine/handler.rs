//! Per-item transfer handlers
//!
//! A handler performs one transfer through the connection pool. The executor
//! owns scheduling, cancellation scope and bookkeeping; handlers only move
//! bytes (or messages) and report what went wrong.

use super::config::{best_threads, EngineConfig};
use super::progress::Progress;
use super::sink::{Destination, FileSink};
use super::TransferError;
use crate::iter::{ForwardElem, UploadElem, WorkItem};
use crate::pool::ConnectionPool;
use crate::transport::Transport;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Performs the transfer of one item
#[async_trait]
pub trait ItemHandler<I>: Send + Sync + 'static {
    /// Label used in logs and metrics
    fn kind(&self) -> &'static str;

    /// Transfer `item`, observing `cancel`
    async fn handle(
        &self,
        item: &I,
        cancel: &CancellationToken,
        progress: &dyn Progress<I>,
    ) -> Result<(), TransferError>;
}

/// Run `fut` unless `cancel` fires first
async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, TransferError>
where
    F: std::future::Future<Output = Result<T, TransferError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        result = fut => result,
    }
}

/// Downloads media into a directory
pub struct DownloadHandler<T: Transport> {
    pool: Arc<ConnectionPool<T>>,
    dir: PathBuf,
    config: EngineConfig,
}

impl<T: Transport> DownloadHandler<T> {
    /// Write files under `dir`
    pub fn new(pool: Arc<ConnectionPool<T>>, dir: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            pool,
            dir: dir.into(),
            config,
        }
    }
}

#[async_trait]
impl<T: Transport> ItemHandler<WorkItem> for DownloadHandler<T> {
    fn kind(&self) -> &'static str {
        "download"
    }

    async fn handle(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
        progress: &dyn Progress<WorkItem>,
    ) -> Result<(), TransferError> {
        let client = if item.bulk {
            self.pool.bulk_client(cancel, item.dc).await?
        } else {
            self.pool.client(cancel, item.dc).await?
        };

        let dest = Destination::new(&self.dir, &item.name)?;
        dest.prepare()?;
        let threads = best_threads(item.size, self.config.threads);
        debug!(
            id = item.id,
            dc = item.dc,
            size = item.size,
            threads,
            path = %dest.path.display(),
            "Starting download"
        );

        let sink = FileSink::create(&dest.temp, |written| {
            progress.on_bytes(item, written, item.size)
        })?;
        let transport = self.pool.transport();
        let result = cancellable(cancel, async {
            transport
                .download(&client, &item.location, &sink, self.config.part_size, threads)
                .await
                .map_err(TransferError::from)
        })
        .await
        .and_then(|()| sink.sync().map_err(TransferError::from));
        drop(sink);

        match result.and_then(|()| dest.commit().map_err(TransferError::from)) {
            Ok(()) => Ok(()),
            Err(e) => {
                dest.discard();
                Err(e)
            }
        }
    }
}

/// Pushes local files through the home datacenter
pub struct UploadHandler<T: Transport> {
    pool: Arc<ConnectionPool<T>>,
}

impl<T: Transport> UploadHandler<T> {
    /// Upload through `pool`'s default client
    pub fn new(pool: Arc<ConnectionPool<T>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl<T: Transport> ItemHandler<UploadElem> for UploadHandler<T> {
    fn kind(&self) -> &'static str {
        "upload"
    }

    async fn handle(
        &self,
        item: &UploadElem,
        cancel: &CancellationToken,
        progress: &dyn Progress<UploadElem>,
    ) -> Result<(), TransferError> {
        let client = self.pool.default_client(cancel).await?;
        let transport = self.pool.transport();
        cancellable(cancel, async {
            transport
                .push(&client, item)
                .await
                .map_err(TransferError::from)
        })
        .await?;
        progress.on_bytes(item, item.file.size, item.file.size);

        if item.remove {
            std::fs::remove_file(&item.file.path)?;
            debug!(path = %item.file.path.display(), "Removed uploaded file");
        }
        Ok(())
    }
}

/// Forwards messages through the home datacenter
pub struct ForwardHandler<T: Transport> {
    pool: Arc<ConnectionPool<T>>,
}

impl<T: Transport> ForwardHandler<T> {
    /// Forward through `pool`'s default client
    pub fn new(pool: Arc<ConnectionPool<T>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl<T: Transport> ItemHandler<ForwardElem> for ForwardHandler<T> {
    fn kind(&self) -> &'static str {
        "forward"
    }

    async fn handle(
        &self,
        item: &ForwardElem,
        cancel: &CancellationToken,
        _progress: &dyn Progress<ForwardElem>,
    ) -> Result<(), TransferError> {
        if item.dry_run {
            info!(elem = %item, "Dry run, not forwarding");
            return Ok(());
        }
        let client = self.pool.default_client(cancel).await?;
        let transport = self.pool.transport();
        cancellable(cancel, async {
            transport
                .forward(&client, item)
                .await
                .map_err(TransferError::from)
        })
        .await
    }
}
