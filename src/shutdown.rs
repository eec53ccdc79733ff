//! Ctrl+C handling
//!
//! [`ShutdownCoordinator`] owns the root [`CancellationToken`] of the process.
//! Every run derives a child token from it, so an interrupt stops in-flight
//! transfers while completed items stay checkpointed and temp files are
//! cleaned up by their handlers.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared handle to a shutdown coordinator
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Root cancellation scope of the process
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    root: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator whose token is not cancelled yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared coordinator that already listens for Ctrl+C
    pub fn install() -> SharedShutdown {
        let coordinator = Arc::new(Self::new());
        coordinator.listen_for_ctrl_c();
        coordinator
    }

    /// Token to hand to runs; cancelled once shutdown is requested
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Cancel the root token. Later calls are no-ops.
    pub fn request_shutdown(&self) {
        if !self.root.is_cancelled() {
            info!("Shutdown requested, cancelling runs");
            self.root.cancel();
        }
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Resolves once shutdown is requested
    pub async fn wait_for_shutdown(&self) {
        self.root.cancelled().await;
    }

    /// Request shutdown on the first Ctrl+C
    pub fn listen_for_ctrl_c(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl+C received");
                    coordinator.request_shutdown();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
            }
        });
    }
}
