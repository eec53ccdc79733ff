//! In-memory transport used by the integration tests

use async_trait::async_trait;
use courier::iter::{ForwardElem, UploadElem};
use courier::transport::{
    ClientMode, DcId, Location, MediaDescriptor, Message, MessageId, PeerHandle, PeerRef,
    Transport, TransportError, WriteAt,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Client handed out by [`MockTransport`]
#[derive(Debug)]
pub struct MockClient {
    pub dc: DcId,
    pub mode: ClientMode,
}

#[derive(Debug, Clone)]
struct Media {
    name: String,
    dc: DcId,
    content: Vec<u8>,
}

/// Scriptable transport
#[derive(Default)]
pub struct MockTransport {
    media: HashMap<(i64, MessageId), Media>,
    text_only: HashSet<(i64, MessageId)>,
    resolve_failures: HashSet<(i64, MessageId)>,
    connect_failures: AtomicUsize,
    connect_delay: Duration,
    download_delay: Duration,
    /// Downloads of this location cancel the token and never finish
    trap: Option<(Location, CancellationToken)>,

    pub connects: AtomicUsize,
    pub downloads: Mutex<Vec<(Location, ClientMode)>>,
    pub pushes: Mutex<Vec<PathBuf>>,
    pub forwards: Mutex<Vec<(i64, MessageId, i64)>>,
}

pub fn location(peer: i64, msg: MessageId) -> Location {
    Location(format!("{peer}:{msg}").into_bytes())
}

/// Deterministic file content for a message
pub fn content_for(peer: i64, msg: MessageId, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((peer as usize + msg as usize + i) % 251) as u8).collect()
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a media message with generated content
    pub fn with_media(mut self, peer: i64, msg: MessageId, name: &str, size: usize) -> Self {
        self.media.insert(
            (peer, msg),
            Media {
                name: name.to_string(),
                dc: 2,
                content: content_for(peer, msg, size),
            },
        );
        self
    }

    /// Register a media message stored on `dc`
    pub fn with_media_on(mut self, peer: i64, msg: MessageId, name: &str, dc: DcId) -> Self {
        self.media.insert(
            (peer, msg),
            Media {
                name: name.to_string(),
                dc,
                content: content_for(peer, msg, 64),
            },
        );
        self
    }

    /// Register a message without media
    pub fn with_text(mut self, peer: i64, msg: MessageId) -> Self {
        self.text_only.insert((peer, msg));
        self
    }

    /// Make resolving this message fail
    pub fn with_resolve_failure(mut self, peer: i64, msg: MessageId) -> Self {
        self.resolve_failures.insert((peer, msg));
        self
    }

    /// Fail the next `n` connection attempts
    pub fn with_connect_failures(self, n: usize) -> Self {
        self.connect_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    /// Cancel `token` when this message is downloaded, then hang
    pub fn with_cancel_on(mut self, peer: i64, msg: MessageId, token: CancellationToken) -> Self {
        self.trap = Some((location(peer, msg), token));
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Client = MockClient;

    async fn connect(&self, dc: DcId, mode: ClientMode) -> Result<MockClient, TransportError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let failing = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::NetworkError("connection refused".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockClient { dc, mode })
    }

    async fn resolve_peer(&self, peer: &PeerRef) -> Result<PeerHandle, TransportError> {
        Ok(PeerHandle {
            id: peer.0,
            name: Some(format!("peer-{}", peer.0)),
        })
    }

    async fn resolve_message(
        &self,
        _client: &MockClient,
        peer: &PeerHandle,
        id: MessageId,
    ) -> Result<Message, TransportError> {
        let key = (peer.id, id);
        if self.resolve_failures.contains(&key) {
            return Err(TransportError::AccessDenied(format!("{}/{}", peer.id, id)));
        }
        let media = match self.media.get(&key) {
            Some(media) => Some(MediaDescriptor {
                name: media.name.clone(),
                size: media.content.len() as u64,
                dc: media.dc,
                location: location(peer.id, id),
            }),
            None if self.text_only.contains(&key) => None,
            None => return Err(TransportError::NotFound(format!("{}/{}", peer.id, id))),
        };
        Ok(Message {
            id,
            date: 1_700_000_000 + id as i64,
            author_id: Some(42),
            media,
        })
    }

    async fn download(
        &self,
        client: &MockClient,
        location: &Location,
        sink: &dyn WriteAt,
        part_size: usize,
        _threads: usize,
    ) -> Result<(), TransportError> {
        self.downloads
            .lock()
            .unwrap()
            .push((location.clone(), client.mode));

        if let Some((trap, token)) = &self.trap {
            if trap == location {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }

        let text = String::from_utf8_lossy(&location.0).into_owned();
        let (peer, msg) = text
            .split_once(':')
            .and_then(|(p, m)| Some((p.parse::<i64>().ok()?, m.parse::<MessageId>().ok()?)))
            .ok_or_else(|| TransportError::NotFound(text.clone()))?;
        let media = self
            .media
            .get(&(peer, msg))
            .ok_or_else(|| TransportError::NotFound(text.clone()))?;

        // Write parts back to front to exercise positional writes.
        let parts: Vec<_> = media.content.chunks(part_size.max(1)).enumerate().collect();
        for (index, chunk) in parts.into_iter().rev() {
            sink.write_at(chunk, (index * part_size.max(1)) as u64)?;
        }
        Ok(())
    }

    async fn push(&self, _client: &MockClient, elem: &UploadElem) -> Result<(), TransportError> {
        self.pushes.lock().unwrap().push(elem.file.path.clone());
        Ok(())
    }

    async fn forward(&self, _client: &MockClient, elem: &ForwardElem) -> Result<(), TransportError> {
        self.forwards
            .lock()
            .unwrap()
            .push((elem.from.id, elem.message.id, elem.to.id));
        Ok(())
    }
}
