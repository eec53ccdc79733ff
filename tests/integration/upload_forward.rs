//! Upload and forward runs

use crate::support::mock_transport::MockTransport;
use courier::engine::{Executor, ForwardHandler, RunError, UploadHandler};
use courier::iter::{
    ForwardIter, ForwardMode, ForwardOptions, ForwardSource, IterError, SessionError, UploadFile,
    UploadIter, UploadOptions,
};
use courier::pool::ConnectionPool;
use courier::transport::{PeerHandle, PeerRef};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

fn destination() -> PeerHandle {
    PeerHandle {
        id: 777,
        name: Some("archive".to_string()),
    }
}

fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Every file is pushed and removed afterwards when asked to
#[tokio::test]
async fn test_upload_with_removal() {
    let transport = MockTransport::new().shared();
    let pool = Arc::new(ConnectionPool::new(transport.clone(), 2));
    let dir = TempDir::new().unwrap();
    let files = vec![
        UploadFile::new(write(&dir, "a.txt", b"alpha")),
        UploadFile::new(write(&dir, "b.mp4", b"beta")).with_thumb(write(&dir, "b.png", PNG_HEADER)),
    ];

    let mut iter = UploadIter::new(
        files,
        UploadOptions {
            to: destination(),
            as_photo: false,
            remove_after_upload: true,
        },
    );
    let executor = Executor::new(UploadHandler::new(pool));
    executor
        .run_linear(&mut iter, &CancellationToken::new(), 2)
        .await
        .unwrap();

    assert_eq!(executor.stats().succeeded, 2);
    assert_eq!(transport.pushes.lock().unwrap().len(), 2);
    assert!(!dir.path().join("a.txt").exists());
    assert!(!dir.path().join("b.mp4").exists());
    assert!(dir.path().join("b.png").exists());
}

/// A thumbnail that is not an image ends the run before anything is pushed
#[tokio::test]
async fn test_non_image_thumbnail_is_terminal() {
    let transport = MockTransport::new().shared();
    let pool = Arc::new(ConnectionPool::new(transport.clone(), 2));
    let dir = TempDir::new().unwrap();
    let files = vec![
        UploadFile::new(write(&dir, "a.mp4", b"video")).with_thumb(write(&dir, "thumb.txt", b"plain text")),
        UploadFile::new(write(&dir, "b.txt", b"never sent")),
    ];

    let mut iter = UploadIter::new(
        files,
        UploadOptions {
            to: destination(),
            as_photo: false,
            remove_after_upload: false,
        },
    );
    let executor = Executor::new(UploadHandler::new(pool));
    let result = executor
        .run_linear(&mut iter, &CancellationToken::new(), 2)
        .await;

    match result {
        Err(RunError::Iter(IterError::InvalidThumbnail { path, .. })) => {
            assert!(path.ends_with("thumb.txt"));
        }
        other => panic!("Expected invalid thumbnail, got {:?}", other),
    }
    assert!(transport.pushes.lock().unwrap().is_empty());
    assert_eq!(executor.stats().started, 0);
}

/// A missing file ends the run; files before it are still uploaded
#[tokio::test]
async fn test_missing_upload_file() {
    let transport = MockTransport::new().shared();
    let pool = Arc::new(ConnectionPool::new(transport.clone(), 2));
    let dir = TempDir::new().unwrap();
    let files = vec![
        UploadFile::new(write(&dir, "a.txt", b"alpha")),
        UploadFile::new(dir.path().join("gone.txt")),
        UploadFile::new(write(&dir, "c.txt", b"gamma")),
    ];

    let mut iter = UploadIter::new(
        files,
        UploadOptions {
            to: destination(),
            as_photo: true,
            remove_after_upload: false,
        },
    );
    let executor = Executor::new(UploadHandler::new(pool));
    let result = executor.run_linear(&mut iter, &CancellationToken::new(), 1).await;

    assert!(matches!(result, Err(RunError::Iter(IterError::IoError(_)))));
    assert_eq!(*transport.pushes.lock().unwrap(), vec![dir.path().join("a.txt")]);
}

/// Messages are forwarded in source order
#[tokio::test]
async fn test_forward_run() {
    let transport = MockTransport::new()
        .with_text(10, 1)
        .with_text(10, 2)
        .with_media(20, 5, "a.jpg", 8)
        .shared();
    let pool = Arc::new(ConnectionPool::new(transport.clone(), 2));
    let cancel = CancellationToken::new();

    let mut iter = ForwardIter::new(
        pool.clone(),
        vec![
            ForwardSource {
                from: PeerRef(10),
                messages: vec![1, 2],
            },
            ForwardSource {
                from: PeerRef(20),
                messages: vec![5],
            },
        ],
        PeerRef(99),
        ForwardOptions {
            mode: ForwardMode::Clone,
            ..ForwardOptions::default()
        },
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(iter.total(), 3);

    let executor = Executor::new(ForwardHandler::new(pool));
    executor.run_linear(&mut iter, &cancel, 1).await.unwrap();

    assert_eq!(
        *transport.forwards.lock().unwrap(),
        vec![(10, 1, 99), (10, 2, 99), (20, 5, 99)]
    );
}

/// Dry runs resolve messages but never forward them
#[tokio::test]
async fn test_forward_dry_run() {
    let transport = MockTransport::new().with_text(10, 1).with_text(10, 2).shared();
    let pool = Arc::new(ConnectionPool::new(transport.clone(), 2));
    let cancel = CancellationToken::new();

    let mut iter = ForwardIter::new(
        pool.clone(),
        vec![ForwardSource {
            from: PeerRef(10),
            messages: vec![1, 2],
        }],
        PeerRef(99),
        ForwardOptions {
            dry_run: true,
            ..ForwardOptions::default()
        },
        &cancel,
    )
    .await
    .unwrap();

    let executor = Executor::new(ForwardHandler::new(pool));
    executor.run_linear(&mut iter, &cancel, 4).await.unwrap();

    assert_eq!(executor.stats().succeeded, 2);
    assert!(transport.forwards.lock().unwrap().is_empty());
}

/// A message that cannot be resolved ends the forward run
#[tokio::test]
async fn test_forward_resolve_failure_is_terminal() {
    let transport = MockTransport::new()
        .with_text(10, 1)
        .with_resolve_failure(10, 2)
        .with_text(10, 3)
        .shared();
    let pool = Arc::new(ConnectionPool::new(transport.clone(), 2));
    let cancel = CancellationToken::new();

    let mut iter = ForwardIter::new(
        pool.clone(),
        vec![ForwardSource {
            from: PeerRef(10),
            messages: vec![1, 2, 3],
        }],
        PeerRef(99),
        ForwardOptions::default(),
        &cancel,
    )
    .await
    .unwrap();

    let executor = Executor::new(ForwardHandler::new(pool));
    let result = executor.run_linear(&mut iter, &cancel, 1).await;

    assert!(matches!(result, Err(RunError::Iter(_))));
    assert_eq!(*transport.forwards.lock().unwrap(), vec![(10, 1, 99)]);
}

/// Sources without messages are a setup error
#[tokio::test]
async fn test_forward_empty_source() {
    let pool = Arc::new(ConnectionPool::new(MockTransport::new().shared(), 2));
    let result = ForwardIter::new(
        pool,
        vec![ForwardSource {
            from: PeerRef(10),
            messages: vec![],
        }],
        PeerRef(99),
        ForwardOptions::default(),
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(result, Err(SessionError::EmptySource)));
}
