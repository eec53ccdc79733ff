//! Transfer configuration constants

use serde::{Deserialize, Serialize};

/// Bytes requested per download part.
/// 512 KiB is the largest part size the service accepts.
pub const DEFAULT_PART_SIZE: usize = 512 * 1024;

/// Maximum parallel part requests per file.
pub const DEFAULT_THREADS: usize = 4;

/// Files transferred at the same time.
pub const DEFAULT_CONCURRENCY: isize = 2;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Size thresholds and the part-request parallelism each one earns.
/// Files at or above the last threshold use the configured maximum.
const THREAD_STEPS: [(u64, usize); 4] = [(MIB, 1), (5 * MIB, 2), (20 * MIB, 4), (50 * MIB, 8)];

/// Parallel part requests worth spending on a file of `size` bytes
pub fn best_threads(size: u64, max: usize) -> usize {
    let max = max.max(1);
    THREAD_STEPS
        .iter()
        .find(|(limit, _)| size < *limit)
        .map_or(max, |&(_, threads)| threads.min(max))
}

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes per download part
    pub part_size: usize,
    /// Maximum part requests per file
    pub threads: usize,
    /// Concurrent transfers (`<= 0` is unbounded)
    pub concurrency: isize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            threads: DEFAULT_THREADS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl EngineConfig {
    /// Set the part size
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    /// Set the per-file thread limit
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the number of concurrent transfers
    pub fn with_concurrency(mut self, concurrency: isize) -> Self {
        self.concurrency = concurrency;
        self
    }
}
