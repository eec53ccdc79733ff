//! # Courier
//!
//! A resumable, concurrent bulk-transfer engine for message-oriented content
//! services. Work sources (conversations holding media, local files to push,
//! forward instructions) are turned into a uniform stream of work items and
//! drained through a bounded worker pool. Completed downloads are checkpointed
//! so an interrupted session picks up where it stopped.
//!
//! ## Features
//!
//! - **Resumable downloads**: stable item ids, a session fingerprint and a
//!   persisted finished set
//! - **Bounded concurrency**: per-item failures are isolated, cancellation
//!   stops the whole run
//! - **Connection pooling**: one lazily-built client per datacenter and
//!   session mode
//! - **Pluggable checkpoint store**: legacy, embedded and plain-file backends
//!   with lossless migration between them
//!
//! ## Architecture
//!
//! - [`kv`] - Checkpoint store backends and driver registry
//! - [`transport`] - Boundary with the remote service
//! - [`pool`] - Per-datacenter connection pool
//! - [`iter`] - Download, upload and forward work sources
//! - [`resume`] - Session fingerprints and finished-set persistence
//! - [`engine`] - Bounded-concurrency executor and transfer handlers
//! - [`metrics`] - Prometheus metrics
//! - [`shutdown`] - Ctrl+C handling
//!
//! The remote protocol itself is supplied by the embedding application through
//! the [`transport::Transport`] trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// CLI command implementations
pub mod cli;

/// Transfer orchestration
pub mod engine;

/// Work iterators
pub mod iter;

/// Checkpoint store
pub mod kv;

/// Metrics collection and Prometheus exporter
pub mod metrics;

/// Connection pool
pub mod pool;

/// Resume capability
pub mod resume;

/// Graceful shutdown coordination
pub mod shutdown;

/// Remote service boundary
pub mod transport;

pub use engine::{EngineConfig, Executor, RunError, RunSummary, TransferError};
pub use iter::{DownloadIter, IterError, LinearIter, ResumableIter, SessionError, WorkItem};
pub use kv::{Driver, KvError, Registry, SharedStorage, StorageOptions};
pub use pool::{ConnectionPool, PoolError};
pub use transport::{ClientMode, DcId, Transport, TransportError};
