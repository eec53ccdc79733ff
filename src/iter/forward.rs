//! Linear forward source
//!
//! Peers are resolved up front; messages are fetched one at a time as the
//! executor pulls them. A message that cannot be resolved ends iteration.

use super::{IterError, LinearIter, SessionError};
use crate::pool::ConnectionPool;
use crate::transport::{Message, MessageId, PeerHandle, PeerRef, Transport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a message is re-posted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardMode {
    /// Forward keeping the original attribution
    #[default]
    Direct,
    /// Re-send the content as a new message
    Clone,
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardMode::Direct => f.write_str("direct"),
            ForwardMode::Clone => f.write_str("clone"),
        }
    }
}

/// Messages to forward from one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSource {
    /// Source conversation
    pub from: PeerRef,
    /// Messages in it
    pub messages: Vec<MessageId>,
}

/// Per-run forward flags
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardOptions {
    /// Forward mode
    pub mode: ForwardMode,
    /// Post without notification
    pub silent: bool,
    /// Report what would be forwarded without doing it
    pub dry_run: bool,
}

/// One forward instruction
#[derive(Debug, Clone)]
pub struct ForwardElem {
    /// Source conversation
    pub from: PeerHandle,
    /// Message to forward
    pub message: Message,
    /// Destination conversation
    pub to: PeerHandle,
    /// Forward mode
    pub mode: ForwardMode,
    /// Post without notification
    pub silent: bool,
    /// Skip the remote call
    pub dry_run: bool,
}

impl fmt::Display for ForwardElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} -> {} ({})",
            self.from.id, self.message.id, self.to.id, self.mode
        )
    }
}

/// Sequential iterator over forward instructions
pub struct ForwardIter<T: Transport> {
    pool: Arc<ConnectionPool<T>>,
    sources: Vec<(PeerHandle, Vec<MessageId>)>,
    to: PeerHandle,
    opts: ForwardOptions,
    group: usize,
    index: usize,
    err: Option<IterError>,
    value: Option<ForwardElem>,
}

impl<T: Transport> ForwardIter<T> {
    /// Resolve every source peer and the destination
    pub async fn new(
        pool: Arc<ConnectionPool<T>>,
        sources: Vec<ForwardSource>,
        to: PeerRef,
        opts: ForwardOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, SessionError> {
        let resolve = |peer: PeerRef| {
            let pool = pool.clone();
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(SessionError::Cancelled),
                    handle = pool.transport().resolve_peer(&peer) => handle
                        .map_err(|source| SessionError::ResolvePeer { peer: peer.clone(), source }),
                }
            }
        };

        let mut resolved = Vec::with_capacity(sources.len());
        for source in sources {
            if source.messages.is_empty() {
                continue;
            }
            resolved.push((resolve(source.from).await?, source.messages));
        }
        if resolved.is_empty() {
            return Err(SessionError::EmptySource);
        }
        let to = resolve(to).await?;

        Ok(Self {
            pool,
            sources: resolved,
            to,
            opts,
            group: 0,
            index: 0,
            err: None,
            value: None,
        })
    }

    /// Number of messages to forward
    pub fn total(&self) -> usize {
        self.sources.iter().map(|(_, m)| m.len()).sum()
    }

    fn fail(&mut self, err: IterError) -> bool {
        warn!(error = %err, "Forward iteration stopped");
        self.err = Some(err);
        false
    }
}

#[async_trait]
impl<T: Transport> LinearIter for ForwardIter<T> {
    type Item = ForwardElem;

    async fn next(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return self.fail(IterError::Cancelled);
        }
        if self.err.is_some() {
            return false;
        }
        let Some((from, messages)) = self.sources.get(self.group) else {
            return false;
        };
        let from = from.clone();
        let msg_id = messages[self.index];
        self.index += 1;
        if self.index >= messages.len() {
            self.group += 1;
            self.index = 0;
        }

        let client = match self.pool.default_client(cancel).await {
            Ok(client) => client,
            Err(e) if e.is_cancelled() => return self.fail(IterError::Cancelled),
            Err(e) => return self.fail(IterError::ResolveError(e.to_string())),
        };
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IterError::Cancelled),
            message = self.pool.transport().resolve_message(&client, &from, msg_id) => {
                message.map_err(IterError::from)
            }
        };
        let message = match message {
            Ok(message) => message,
            Err(e) => return self.fail(e),
        };

        debug!(from = from.id, message = msg_id, "Prepared forward");
        self.value = Some(ForwardElem {
            from,
            message,
            to: self.to.clone(),
            mode: self.opts.mode,
            silent: self.opts.silent,
            dry_run: self.opts.dry_run,
        });
        true
    }

    fn value(&mut self) -> Option<ForwardElem> {
        self.value.take()
    }

    fn err(&self) -> Option<&IterError> {
        self.err.as_ref()
    }
}
