//! Connection pool memoization

use crate::support::mock_transport::MockTransport;
use courier::pool::{ConnectionPool, PoolError};
use courier::transport::ClientMode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Simultaneous requests for one uncached datacenter connect once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_connect_once() {
    let transport = MockTransport::new()
        .with_connect_delay(Duration::from_millis(50))
        .shared();
    let pool = Arc::new(ConnectionPool::new(transport.clone(), 2));
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { pool.client(&cancel, 4).await }));
    }
    let clients: Vec<_> = futures_util::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(transport.connect_count(), 1);
    assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
    assert_eq!(clients[0].dc, 4);
    assert_eq!(pool.len(), 1);
}

/// Modes and datacenters get separate clients
#[tokio::test]
async fn test_clients_are_keyed_by_dc_and_mode() {
    let transport = MockTransport::new().shared();
    let pool = ConnectionPool::new(transport.clone(), 2);
    let cancel = CancellationToken::new();

    let home = pool.default_client(&cancel).await.unwrap();
    let same = pool.client(&cancel, 2).await.unwrap();
    let bulk = pool.bulk_client(&cancel, 2).await.unwrap();
    let other = pool.client(&cancel, 5).await.unwrap();

    assert!(Arc::ptr_eq(&home, &same));
    assert_eq!(bulk.mode, ClientMode::Bulk);
    assert_eq!(other.dc, 5);
    assert_eq!(transport.connect_count(), 3);
    assert_eq!(pool.len(), 3);
}

/// A failed construction is retried by the next request
#[tokio::test]
async fn test_failed_connect_is_not_cached() {
    let transport = MockTransport::new().with_connect_failures(1).shared();
    let pool = ConnectionPool::new(transport.clone(), 2);
    let cancel = CancellationToken::new();

    match pool.client(&cancel, 3).await {
        Err(PoolError::ConnectError { dc, mode, .. }) => {
            assert_eq!(dc, 3);
            assert_eq!(mode, ClientMode::Normal);
        }
        other => panic!("Expected connect error, got {:?}", other.map(|_| ())),
    }
    assert!(pool.is_empty());

    pool.client(&cancel, 3).await.unwrap();
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(pool.len(), 1);
}

/// Waiting for a client observes cancellation
#[tokio::test]
async fn test_cancelled_request() {
    let transport = MockTransport::new()
        .with_connect_delay(Duration::from_secs(30))
        .shared();
    let pool = Arc::new(ConnectionPool::new(transport, 2));
    let cancel = CancellationToken::new();

    let waiter = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.client(&cancel, 2).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(PoolError::Cancelled)));
    assert!(result.unwrap_err().is_cancelled());
}

/// Closing drops cached clients so the next request reconnects
#[tokio::test]
async fn test_close_drops_clients() {
    let transport = MockTransport::new().shared();
    let pool = ConnectionPool::new(transport.clone(), 2);
    let cancel = CancellationToken::new();

    pool.default_client(&cancel).await.unwrap();
    pool.close();
    assert!(pool.is_empty());
    pool.default_client(&cancel).await.unwrap();
    assert_eq!(transport.connect_count(), 2);
}
