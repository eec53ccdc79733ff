//! Progress reporting for transfer runs.
//!
//! The executor reports every item through a [`Progress`] sink. [`LogProgress`]
//! turns those events into periodic `[PROGRESS]` log lines with a completion
//! percentage, rate and remaining-time estimate; [`RunStats`] keeps the
//! counters a caller can inspect after the run.

use super::TransferError;
use crate::iter::IterError;
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);

/// Receiver of per-item run events
pub trait Progress<I>: Send + Sync {
    /// A transfer of `item` is about to start
    fn on_add(&self, item: &I);

    /// `written` of `total` bytes of `item` are on disk
    fn on_bytes(&self, _item: &I, _written: u64, _total: u64) {}

    /// The transfer of `item` ended, with `err` on failure
    fn on_done(&self, item: &I, err: Option<&TransferError>);

    /// An item needed no transfer
    fn on_skip(&self) {}

    /// An item could not be resolved and was never started
    fn on_resolve_failed(&self, _err: &IterError) {}
}

/// Sink that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl<I> Progress<I> for NoProgress {
    fn on_add(&self, _item: &I) {}
    fn on_done(&self, _item: &I, _err: Option<&TransferError>) {}
}

/// Progress tracking state for a run.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Items that finished (successfully or not).
    pub items_done: u64,
    /// Total expected items (if known).
    pub total_expected: Option<u64>,
    /// Timestamp when the run started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between progress updates.
    pub update_interval: Duration,
    /// Current rate (items per second).
    pub current_rate: f64,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a new progress state with default intervals.
    pub fn new(total_expected: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            items_done: 0,
            total_expected,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Count `n` more finished items.
    pub fn update(&mut self, n: u64) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        self.items_done = self.items_done.saturating_add(n);
        if elapsed > 0.0 {
            self.current_rate = self.items_done as f64 / elapsed;
        }
    }

    /// Whether a progress update should be emitted based on time or percentage.
    pub fn should_emit_update(&self) -> bool {
        if self.items_done == 0 {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached percentage.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Completion percentage (0-100), when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.items_done as f64 / total as f64) * 100.0)
    }

    /// Estimate remaining time from the current rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_expected?.saturating_sub(self.items_done);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!("[PROGRESS] Transferred {} items", self.items_done)];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.1} items/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}

/// Progress sink that logs through `tracing`
#[derive(Debug)]
pub struct LogProgress {
    state: Mutex<ProgressState>,
}

impl LogProgress {
    /// Track a run of `total` items (if known)
    pub fn new(total: Option<u64>) -> Self {
        Self {
            state: Mutex::new(ProgressState::new(total)),
        }
    }

    /// Snapshot of the tracking state
    pub fn state(&self) -> ProgressState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn advance(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.update(1);
        if state.should_emit_update() {
            info!("{}", state.format_progress());
            state.mark_emitted();
        }
    }
}

impl<I: Display> Progress<I> for LogProgress {
    fn on_add(&self, item: &I) {
        debug!(item = %item, "Transfer started");
    }

    fn on_done(&self, item: &I, err: Option<&TransferError>) {
        match err {
            None => debug!(item = %item, "Transfer completed"),
            Some(e) if e.is_cancelled() => debug!(item = %item, "Transfer cancelled"),
            Some(e) => warn!(item = %item, error = %e, "Transfer failed"),
        }
        self.advance();
    }

    fn on_skip(&self) {
        self.advance();
    }

    fn on_resolve_failed(&self, err: &IterError) {
        warn!(error = %err, "Item could not be resolved");
        self.advance();
    }
}

/// Run counters
#[derive(Debug, Default)]
pub struct RunStats {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time copy of [`RunStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Transfers started
    pub started: u64,
    /// Transfers that succeeded
    pub succeeded: u64,
    /// Items that failed to resolve or transfer
    pub failed: u64,
    /// Transfers stopped by cancellation
    pub cancelled: u64,
    /// Items skipped
    pub skipped: u64,
}

impl RunStats {
    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}
