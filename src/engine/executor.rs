//! Bounded-concurrency transfer executor
//!
//! Drains an iterator through at most `concurrency` concurrent units. Each
//! unit reports *started*, transfers, then reports *completed* with its error,
//! if any. Per-item failures are absorbed; a cancellation observed by any unit
//! cancels the run-scoped token so every sibling unwinds, and the run then
//! returns [`RunError::Cancelled`].

use super::handler::ItemHandler;
use super::progress::{NoProgress, Progress, RunStats, RunSummary};
use super::{RunError, TransferError};
use crate::iter::{IterError, LinearIter, ResumableIter, WorkItem};
use crate::metrics::{self, TransferMetrics};
use std::sync::{Arc, OnceLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// State shared by every unit of a run
struct Unit<I, H> {
    handler: Arc<H>,
    progress: Arc<dyn Progress<I>>,
    stats: Arc<RunStats>,
    run: CancellationToken,
    fatal: Arc<OnceLock<TransferError>>,
}

impl<I, H> Clone for Unit<I, H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            progress: self.progress.clone(),
            stats: self.stats.clone(),
            run: self.run.clone(),
            fatal: self.fatal.clone(),
        }
    }
}

impl<I, H> Unit<I, H>
where
    I: Send + Sync + 'static,
    H: ItemHandler<I>,
{
    /// Stop the whole run because of `err`
    fn abort(&self, err: TransferError) {
        if self.fatal.set(err).is_ok() {
            debug!("Cancellation observed, stopping run");
        }
        self.run.cancel();
    }

    /// Report `item` as started and transfer it
    async fn transfer(&self, item: &I) -> (TransferMetrics, Result<(), TransferError>) {
        self.stats.record_started();
        self.progress.on_add(item);
        let metrics = TransferMetrics::start(self.handler.kind());
        let result = if self.run.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            self.handler.handle(item, &self.run, &*self.progress).await
        };
        (metrics, result)
    }

    /// Record the outcome of `item` and report it as completed
    fn complete(&self, item: &I, metrics: TransferMetrics, result: Result<(), TransferError>) {
        match &result {
            Ok(()) => {
                self.stats.record_succeeded();
                metrics.record_success();
            }
            Err(e) if e.is_cancelled() => {
                self.stats.record_cancelled();
                self.abort(TransferError::Cancelled);
            }
            Err(e) => {
                self.stats.record_failed();
                metrics.record_failure(&e.to_string());
            }
        }
        self.progress.on_done(item, result.as_ref().err());
    }

    /// Drop an item that needed no transfer
    fn skip(&self) {
        self.stats.record_skipped();
        metrics::record_skip(self.handler.kind());
        self.progress.on_skip();
    }
}

/// Wait for a free slot; `None` once the run is cancelled
async fn acquire(
    semaphore: &Option<Arc<Semaphore>>,
    run: &CancellationToken,
) -> Option<Option<OwnedSemaphorePermit>> {
    match semaphore {
        Some(semaphore) => tokio::select! {
            biased;
            _ = run.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok().map(Some),
        },
        None if run.is_cancelled() => None,
        None => Some(None),
    }
}

fn semaphore_for(concurrency: isize) -> Option<Arc<Semaphore>> {
    usize::try_from(concurrency)
        .ok()
        .filter(|&n| n > 0)
        .map(|n| Arc::new(Semaphore::new(n)))
}

/// Wait for every unit; the first panic is reported
async fn join_all(tasks: &mut JoinSet<()>) -> Option<RunError> {
    let mut join_error = None;
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Transfer task failed");
            join_error.get_or_insert(RunError::Join(e.to_string()));
        }
    }
    join_error
}

fn reap(tasks: &mut JoinSet<()>, join_error: &mut Option<RunError>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            error!(error = %e, "Transfer task failed");
            join_error.get_or_insert(RunError::Join(e.to_string()));
        }
    }
}

/// Drains work iterators through an [`ItemHandler`]
pub struct Executor<I, H> {
    handler: Arc<H>,
    progress: Arc<dyn Progress<I>>,
    stats: Arc<RunStats>,
}

impl<I, H> Executor<I, H>
where
    I: Send + Sync + 'static,
    H: ItemHandler<I>,
{
    /// Executor without progress reporting
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            progress: Arc::new(NoProgress),
            stats: Arc::new(RunStats::default()),
        }
    }

    /// Report item events to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn Progress<I>>) -> Self {
        self.progress = progress;
        self
    }

    /// The item handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Counters accumulated over every run of this executor
    pub fn stats(&self) -> RunSummary {
        self.stats.summary()
    }

    fn unit(&self, run: CancellationToken) -> Unit<I, H> {
        Unit {
            handler: self.handler.clone(),
            progress: self.progress.clone(),
            stats: self.stats.clone(),
            run,
            fatal: Arc::new(OnceLock::new()),
        }
    }

    fn log_summary(&self) {
        let summary = self.stats.summary();
        info!(
            started = summary.started,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            "Run finished"
        );
    }

    /// Drain a sequential source
    ///
    /// `concurrency <= 0` runs every item at once. The iterator's own terminal
    /// error takes precedence over cancellation reported by a unit.
    pub async fn run_linear<L>(
        &self,
        iter: &mut L,
        cancel: &CancellationToken,
        concurrency: isize,
    ) -> Result<(), RunError>
    where
        L: LinearIter<Item = I>,
    {
        let span = tracing::info_span!("run", kind = self.handler.kind(), concurrency);
        async {
            let unit = self.unit(cancel.child_token());
            let semaphore = semaphore_for(concurrency);
            let mut tasks = JoinSet::new();
            let mut join_error = None;
            let mut interrupted = false;

            info!("Starting run");
            loop {
                let Some(permit) = acquire(&semaphore, &unit.run).await else {
                    interrupted = true;
                    break;
                };
                if !iter.next(&unit.run).await {
                    break;
                }
                let Some(item) = iter.value() else {
                    break;
                };

                let unit = unit.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let (metrics, result) = unit.transfer(&item).await;
                    unit.complete(&item, metrics, result);
                });
                reap(&mut tasks, &mut join_error);
            }

            if let Some(e) = join_all(&mut tasks).await {
                join_error.get_or_insert(e);
            }
            self.log_summary();

            if let Some(err) = iter.err() {
                warn!(error = %err, "Iterator stopped with error");
                return Err(if err.is_cancelled() {
                    RunError::Cancelled
                } else {
                    RunError::Iter(err.clone())
                });
            }
            if unit.fatal.get().is_some() || interrupted {
                return Err(RunError::Cancelled);
            }
            join_error.map_or(Ok(()), Err)
        }
        .instrument(span)
        .await
    }
}

impl<H> Executor<WorkItem, H>
where
    H: ItemHandler<WorkItem>,
{
    /// Drain a checkpointed source
    ///
    /// Positions are claimed in order by this task and resolved inside the
    /// units. A unit records its id with [`ResumableIter::finish`] after the
    /// transfer succeeds and before reporting completion; a checkpoint failure
    /// is reported as that item's error.
    pub async fn run_resumable<R>(
        &self,
        iter: Arc<R>,
        cancel: &CancellationToken,
        concurrency: isize,
    ) -> Result<(), RunError>
    where
        R: ResumableIter + 'static,
    {
        let span = tracing::info_span!(
            "run",
            kind = self.handler.kind(),
            fingerprint = %iter.fingerprint(),
            concurrency
        );
        async {
            let unit = self.unit(cancel.child_token());
            let semaphore = semaphore_for(concurrency);
            let mut tasks = JoinSet::new();
            let mut join_error = None;
            let mut interrupted = false;

            info!(
                total = iter.total(),
                finished = iter.finished().len(),
                "Starting run"
            );
            loop {
                let Some(permit) = acquire(&semaphore, &unit.run).await else {
                    interrupted = true;
                    break;
                };
                let Some(position) = iter.claim() else {
                    break;
                };

                let unit = unit.clone();
                let iter = iter.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let item = match iter.resolve(position, &unit.run).await {
                        Ok(item) => item,
                        Err(IterError::Skip) => {
                            unit.skip();
                            return;
                        }
                        Err(e) if e.is_cancelled() => {
                            unit.abort(TransferError::Cancelled);
                            return;
                        }
                        Err(e) => {
                            warn!(id = iter.id_of(position), error = %e, "Failed to resolve item");
                            unit.stats.record_failed();
                            unit.progress.on_resolve_failed(&e);
                            return;
                        }
                    };

                    let (metrics, mut result) = unit.transfer(&item).await;
                    if result.is_ok() {
                        if let Err(e) = iter.finish(item.id).await {
                            result = Err(TransferError::CheckpointError(e.to_string()));
                        }
                    }
                    unit.complete(&item, metrics, result);
                });
                reap(&mut tasks, &mut join_error);
            }

            if let Some(e) = join_all(&mut tasks).await {
                join_error.get_or_insert(e);
            }
            self.log_summary();

            if unit.fatal.get().is_some() || interrupted {
                return Err(RunError::Cancelled);
            }
            join_error.map_or(Ok(()), Err)
        }
        .instrument(span)
        .await
    }
}
