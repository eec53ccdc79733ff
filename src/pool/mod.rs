//! Per-datacenter connection pool
//!
//! Clients are built lazily through [`Transport::connect`] and cached for the
//! pool's lifetime, one per `(dc, mode)` pair. Construction is memoized: when
//! several transfers ask for the same uncached pair at once, exactly one of
//! them connects and the others wait for its result. A failed construction is
//! not cached, so the next request tries again.

use crate::metrics;
use crate::transport::{ClientMode, DcId, Transport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection pool errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    /// Cancelled while waiting for a client
    #[error("client request cancelled")]
    Cancelled,

    /// The transport failed to construct a client
    #[error("failed to connect to dc {dc} ({mode}): {source}")]
    ConnectError {
        /// Target datacenter
        dc: DcId,
        /// Requested mode
        mode: ClientMode,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },
}

impl PoolError {
    /// Whether this error stems from cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            PoolError::Cancelled => true,
            PoolError::ConnectError { source, .. } => source.is_cancelled(),
        }
    }
}

type Slot<C> = Arc<OnceCell<Arc<C>>>;

/// Lazily-populated set of endpoint clients
pub struct ConnectionPool<T: Transport> {
    transport: Arc<T>,
    home_dc: DcId,
    clients: Mutex<HashMap<(DcId, ClientMode), Slot<T::Client>>>,
}

impl<T: Transport> ConnectionPool<T> {
    /// Create an empty pool whose default client targets `home_dc`
    pub fn new(transport: Arc<T>, home_dc: DcId) -> Self {
        Self {
            transport,
            home_dc,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The transport used to build clients
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Normal-mode client for `dc`
    pub async fn client(
        &self,
        cancel: &CancellationToken,
        dc: DcId,
    ) -> Result<Arc<T::Client>, PoolError> {
        self.client_for(cancel, dc, ClientMode::Normal).await
    }

    /// Bulk-mode (takeout) client for `dc`
    pub async fn bulk_client(
        &self,
        cancel: &CancellationToken,
        dc: DcId,
    ) -> Result<Arc<T::Client>, PoolError> {
        self.client_for(cancel, dc, ClientMode::Bulk).await
    }

    /// Normal-mode client for the home datacenter
    pub async fn default_client(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<T::Client>, PoolError> {
        self.client_for(cancel, self.home_dc, ClientMode::Normal).await
    }

    /// Client for `(dc, mode)`, connecting on first use
    pub async fn client_for(
        &self,
        cancel: &CancellationToken,
        dc: DcId,
        mode: ClientMode,
    ) -> Result<Arc<T::Client>, PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let slot = self.lock().entry((dc, mode)).or_default().clone();
        if let Some(client) = slot.get() {
            return Ok(client.clone());
        }

        let init = slot.get_or_try_init(|| async {
            debug!(dc, %mode, "Connecting endpoint client");
            match self.transport.connect(dc, mode).await {
                Ok(client) => {
                    info!(dc, %mode, "Endpoint client ready");
                    metrics::record_client_created(dc, mode);
                    Ok(Arc::new(client))
                }
                Err(source) => {
                    warn!(dc, %mode, error = %source, "Endpoint client construction failed");
                    Err(PoolError::ConnectError { dc, mode, source })
                }
            }
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            result = init => result.cloned(),
        }
    }

    /// Number of constructed clients
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    /// Whether no client has been constructed yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached client
    pub fn close(&self) {
        let mut clients = self.lock();
        let count = clients.len();
        clients.clear();
        debug!(count, "Closed connection pool");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(DcId, ClientMode), Slot<T::Client>>> {
        // The map only holds Arc'd cells, so a poisoned guard is still consistent.
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }
}
