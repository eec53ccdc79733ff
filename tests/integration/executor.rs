//! Executor scheduling, failure isolation and cancellation

use crate::support::mock_transport::MockTransport;
use async_trait::async_trait;
use courier::engine::{
    DownloadHandler, EngineConfig, Executor, ItemHandler, Progress, RunError, TransferError,
};
use courier::iter::{DownloadIter, DownloadOptions, Group, IterError, LinearIter, ResumableIter};
use courier::pool::ConnectionPool;
use courier::transport::{PeerRef, TransportError};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Plain in-memory source
struct VecIter {
    items: VecDeque<u32>,
    value: Option<u32>,
    err: Option<IterError>,
    fail_after: Option<usize>,
    yielded: usize,
}

impl VecIter {
    fn new(n: u32) -> Self {
        Self {
            items: (0..n).collect(),
            value: None,
            err: None,
            fail_after: None,
            yielded: 0,
        }
    }

    fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

#[async_trait]
impl LinearIter for VecIter {
    type Item = u32;

    async fn next(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            self.err = Some(IterError::Cancelled);
            return false;
        }
        if self.fail_after == Some(self.yielded) {
            self.err = Some(IterError::IoError("disk on fire".to_string()));
            return false;
        }
        match self.items.pop_front() {
            Some(item) => {
                self.yielded += 1;
                self.value = Some(item);
                true
            }
            None => false,
        }
    }

    fn value(&mut self) -> Option<u32> {
        self.value.take()
    }

    fn err(&self) -> Option<&IterError> {
        self.err.as_ref()
    }
}

/// Sleeps per item, tracking how many run at once
#[derive(Default)]
struct SlowHandler {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    failing: BTreeSet<u32>,
    cancelling: Option<u32>,
}

#[async_trait]
impl ItemHandler<u32> for SlowHandler {
    fn kind(&self) -> &'static str {
        "test"
    }

    async fn handle(
        &self,
        item: &u32,
        _cancel: &CancellationToken,
        _progress: &dyn Progress<u32>,
    ) -> Result<(), TransferError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.cancelling == Some(*item) {
            return Err(TransferError::Cancelled);
        }
        if self.failing.contains(item) {
            return Err(TransferError::Transport(TransportError::NotFound(item.to_string())));
        }
        Ok(())
    }
}

/// Records every progress callback
#[derive(Default)]
struct Recorder {
    added: Mutex<Vec<u32>>,
    done: Mutex<Vec<(u32, bool)>>,
}

impl Progress<u32> for Recorder {
    fn on_add(&self, item: &u32) {
        self.added.lock().unwrap().push(*item);
    }

    fn on_done(&self, item: &u32, err: Option<&TransferError>) {
        self.done.lock().unwrap().push((*item, err.is_none()));
    }
}

/// No more than `concurrency` transfers run at once
#[tokio::test]
async fn test_concurrency_is_bounded() {
    let executor = Executor::new(SlowHandler::default());
    executor
        .run_linear(&mut VecIter::new(12), &CancellationToken::new(), 3)
        .await
        .unwrap();

    let stats = executor.stats();
    assert_eq!(stats.succeeded, 12);
    let handler_max = executor_handler_max(&executor);
    assert!(handler_max <= 3, "max in flight was {handler_max}");
}

/// Zero or negative concurrency runs every item at once
#[tokio::test]
async fn test_non_positive_concurrency_is_unbounded() {
    for concurrency in [0, -1] {
        let executor = Executor::new(SlowHandler::default());
        executor
            .run_linear(&mut VecIter::new(10), &CancellationToken::new(), concurrency)
            .await
            .unwrap();
        assert_eq!(executor.stats().succeeded, 10);
        assert_eq!(executor_handler_max(&executor), 10);
    }
}

fn executor_handler_max(executor: &Executor<u32, SlowHandler>) -> usize {
    executor.handler().max_in_flight.load(Ordering::SeqCst)
}

/// A failing item is reported and the run continues
#[tokio::test]
async fn test_item_failure_is_isolated() {
    let handler = SlowHandler {
        failing: BTreeSet::from([2, 5]),
        ..SlowHandler::default()
    };
    let recorder = Arc::new(Recorder::default());
    let executor = Executor::new(handler).with_progress(recorder.clone());

    executor
        .run_linear(&mut VecIter::new(8), &CancellationToken::new(), 2)
        .await
        .unwrap();

    let stats = executor.stats();
    assert_eq!(stats.started, 8);
    assert_eq!(stats.succeeded, 6);
    assert_eq!(stats.failed, 2);

    let done = recorder.done.lock().unwrap();
    assert_eq!(done.len(), 8);
    assert!(done.iter().filter(|(_, ok)| !ok).all(|(i, _)| *i == 2 || *i == 5));
    assert_eq!(recorder.added.lock().unwrap().len(), 8);
}

/// A unit observing cancellation stops the whole run
#[tokio::test]
async fn test_unit_cancellation_stops_run() {
    let handler = SlowHandler {
        cancelling: Some(1),
        ..SlowHandler::default()
    };
    let executor = Executor::new(handler);
    let cancel = CancellationToken::new();

    let result = executor.run_linear(&mut VecIter::new(50), &cancel, 1).await;
    assert!(matches!(result, Err(RunError::Cancelled)));
    let stats = executor.stats();
    assert!(stats.started < 50);
    assert!(stats.cancelled >= 1);
    assert_eq!(stats.failed, 0);
    // Only the run scope is cancelled, not the caller's token.
    assert!(!cancel.is_cancelled());
}

/// The iterator's own error wins over everything else
#[tokio::test]
async fn test_iterator_error_is_returned() {
    let executor = Executor::new(SlowHandler::default());
    let result = executor
        .run_linear(&mut VecIter::new(10).failing_after(4), &CancellationToken::new(), 2)
        .await;

    match result {
        Err(RunError::Iter(IterError::IoError(msg))) => assert_eq!(msg, "disk on fire"),
        other => panic!("Expected iterator error, got {:?}", other),
    }
    assert_eq!(executor.stats().succeeded, 4);
}

/// An already-cancelled token starts nothing
#[tokio::test]
async fn test_cancelled_before_start() {
    let executor = Executor::new(SlowHandler::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = executor.run_linear(&mut VecIter::new(5), &cancel, 2).await;
    assert!(matches!(result, Err(RunError::Cancelled)));
    assert_eq!(executor.stats().started, 0);
}

/// Failed resolution of one download leaves the others intact
#[tokio::test]
async fn test_download_resolve_failure_is_isolated() {
    let transport = MockTransport::new()
        .with_media(100, 1, "a.bin", 10)
        .with_media(100, 2, "b.bin", 10)
        .with_media(100, 3, "c.bin", 10)
        .with_resolve_failure(100, 2)
        .shared();
    let pool = Arc::new(ConnectionPool::new(transport, 2));
    let out = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let iter = Arc::new(
        DownloadIter::new(
            pool.clone(),
            DownloadOptions::new(vec![Group::new(PeerRef(100), vec![1, 2, 3])]),
            &cancel,
        )
        .await
        .unwrap(),
    );
    let executor = Executor::new(DownloadHandler::new(pool, out.path(), EngineConfig::default()));
    executor.run_resumable(iter.clone(), &cancel, 2).await.unwrap();

    assert_eq!(iter.finished(), BTreeSet::from([0, 2]));
    let stats = executor.stats();
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 1);
}

/// Cancelling mid-run keeps completed items and discards the partial file
#[tokio::test]
async fn test_download_cancellation_propagates() {
    let cancel = CancellationToken::new();
    let transport = MockTransport::new()
        .with_media(100, 1, "a.bin", 10)
        .with_media(100, 2, "b.bin", 10)
        .with_media(100, 3, "c.bin", 10)
        .with_media(100, 4, "d.bin", 10)
        .with_cancel_on(100, 2, cancel.clone())
        .shared();
    let pool = Arc::new(ConnectionPool::new(transport.clone(), 2));
    let out = TempDir::new().unwrap();

    let iter = Arc::new(
        DownloadIter::new(
            pool.clone(),
            DownloadOptions::new(vec![Group::new(PeerRef(100), vec![1, 2, 3, 4])]),
            &cancel,
        )
        .await
        .unwrap(),
    );
    let executor = Executor::new(DownloadHandler::new(pool, out.path(), EngineConfig::default()));
    let result = executor.run_resumable(iter.clone(), &cancel, 1).await;

    assert!(matches!(result, Err(RunError::Cancelled)));
    assert_eq!(iter.finished(), BTreeSet::from([0]));
    assert_eq!(transport.download_count(), 2);
    assert!(out.path().join("100_1_a.bin").exists());
    assert!(!out.path().join("100_2_b.bin").exists());
    assert!(!out.path().join("100_2_b.bin.tmp").exists());

    // An interrupted transfer is not a failure.
    let stats = executor.stats();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);
    assert!(stats.cancelled >= 1);
}

/// Claims hand out every position exactly once across concurrent claimers
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_unique() {
    let transport = MockTransport::new().shared();
    let pool = Arc::new(ConnectionPool::new(transport, 2));
    let groups = (0..8)
        .map(|peer| Group::new(PeerRef(peer), (1..=25).collect()))
        .collect();
    let iter = Arc::new(
        DownloadIter::new(pool, DownloadOptions::new(groups), &CancellationToken::new())
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..4 {
        let iter = iter.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(position) = iter.claim() {
                ids.push(iter.id_of(position));
                tokio::task::yield_now().await;
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all.sort_unstable();
    assert_eq!(all, (0..200).collect::<Vec<_>>());
}
