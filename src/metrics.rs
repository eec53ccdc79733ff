//! Transfer metrics
//!
//! Counters and histograms are recorded through the `metrics` facade and are
//! no-ops until [`init_metrics`] installs the Prometheus exporter, so library
//! users that never call it pay almost nothing.

use crate::transport::{ClientMode, DcId};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are ignored once the exporter is installed.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g. "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "transfers_started_total",
        Unit::Count,
        "Total number of transfers handed to a worker"
    );

    describe_counter!(
        "transfers_completed_total",
        Unit::Count,
        "Total number of transfers that completed successfully"
    );

    describe_counter!(
        "transfers_failed_total",
        Unit::Count,
        "Total number of transfers that failed"
    );

    describe_counter!(
        "transfer_items_skipped_total",
        Unit::Count,
        "Items skipped as already finished, filtered, or without media"
    );

    describe_histogram!(
        "transfer_duration_seconds",
        Unit::Seconds,
        "Wall time of a single transfer"
    );

    describe_counter!(
        "pool_clients_created_total",
        Unit::Count,
        "Endpoint clients constructed by the connection pool"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record a client constructed by the connection pool
pub fn record_client_created(dc: DcId, mode: ClientMode) {
    counter!(
        "pool_clients_created_total",
        "dc" => dc.to_string(),
        "mode" => mode.to_string(),
    )
    .increment(1);
}

/// Record an item that needed no transfer
pub fn record_skip(kind: &'static str) {
    counter!("transfer_items_skipped_total", "kind" => kind).increment(1);
}

/// Per-transfer metrics
pub struct TransferMetrics {
    kind: &'static str,
    start_time: Instant,
}

impl TransferMetrics {
    /// Start tracking one transfer of `kind` ("download", "upload", "forward")
    pub fn start(kind: &'static str) -> Self {
        counter!("transfers_started_total", "kind" => kind).increment(1);
        Self {
            kind,
            start_time: Instant::now(),
        }
    }

    /// Record successful completion
    pub fn record_success(&self) {
        let duration = self.start_time.elapsed();
        counter!("transfers_completed_total", "kind" => self.kind).increment(1);
        histogram!("transfer_duration_seconds", "kind" => self.kind)
            .record(duration.as_secs_f64());
    }

    /// Record a failed transfer
    pub fn record_failure(&self, error: &str) {
        let duration = self.start_time.elapsed();
        counter!("transfers_failed_total", "kind" => self.kind).increment(1);
        histogram!("transfer_duration_seconds", "kind" => self.kind)
            .record(duration.as_secs_f64());
        warn!(
            kind = self.kind,
            error = %error,
            duration_ms = duration.as_millis(),
            "Transfer failed"
        );
    }
}
