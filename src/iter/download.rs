//! Resumable download source
//!
//! Groups of message references are merged, sorted and flattened into a
//! stable id space: `id = pre_sum[group] + index`. The cursor and the
//! finished set share one mutex; claiming a position is the only critical
//! section and resolution runs outside it.

use super::filter::ExtFilter;
use super::template::{format_binary_bytes, NameContext, NameTemplate, DEFAULT_TEMPLATE};
use super::{IterError, Position, ResumableIter, SessionError, WorkItem};
use crate::kv::SharedStorage;
use crate::pool::ConnectionPool;
use crate::resume::{self, FinishedSet, ResumeSession};
use crate::transport::{MessageId, PeerHandle, PeerRef, Transport};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Messages to fetch from one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Conversation
    pub peer: PeerRef,
    /// Message ids within it
    pub messages: Vec<MessageId>,
}

impl Group {
    /// Create a group
    pub fn new(peer: PeerRef, messages: Vec<MessageId>) -> Self {
        Self { peer, messages }
    }
}

/// Download session options
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Work source
    pub groups: Vec<Group>,
    /// Extensions to keep (empty keeps all)
    pub include: Vec<String>,
    /// Extensions to drop
    pub exclude: Vec<String>,
    /// Iterate groups and references in descending order
    pub desc: bool,
    /// Destination-name template
    pub template: String,
    /// Fetch through bulk (takeout) clients
    pub bulk: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            desc: false,
            template: DEFAULT_TEMPLATE.to_string(),
            bulk: false,
        }
    }
}

impl DownloadOptions {
    /// Options for `groups` with defaults elsewhere
    pub fn new(groups: Vec<Group>) -> Self {
        Self {
            groups,
            ..Self::default()
        }
    }
}

struct ResolvedGroup {
    peer: PeerHandle,
    messages: Vec<MessageId>,
}

struct State {
    group: usize,
    next_index: usize,
    finished: FinishedSet,
}

/// Checkpointed iterator over media-bearing messages
pub struct DownloadIter<T: Transport> {
    pool: Arc<ConnectionPool<T>>,
    groups: Vec<ResolvedGroup>,
    pre_sum: Vec<usize>,
    total: usize,
    filter: ExtFilter,
    template: NameTemplate,
    bulk: bool,
    fingerprint: String,
    state: Mutex<State>,
    session: Option<Arc<ResumeSession>>,
    persist: tokio::sync::Mutex<()>,
}

/// Merge groups by identity, de-duplicate and sort references, drop empties
fn collect_groups(groups: Vec<Group>, desc: bool) -> Vec<Group> {
    let mut merged: BTreeMap<PeerRef, BTreeSet<MessageId>> = BTreeMap::new();
    for group in groups {
        merged.entry(group.peer).or_default().extend(group.messages);
    }

    let mut out: Vec<Group> = merged
        .into_iter()
        .filter(|(_, messages)| !messages.is_empty())
        .map(|(peer, messages)| {
            let mut messages: Vec<MessageId> = messages.into_iter().collect();
            if desc {
                messages.reverse();
            }
            Group { peer, messages }
        })
        .collect();
    if desc {
        out.reverse();
    }
    out
}

fn pre_sum(groups: &[Group]) -> Vec<usize> {
    groups
        .iter()
        .scan(0, |acc, g| {
            let start = *acc;
            *acc += g.messages.len();
            Some(start)
        })
        .collect()
}

impl<T: Transport> DownloadIter<T> {
    /// Prepare a session: sort the source, resolve peers, parse the template
    pub async fn new(
        pool: Arc<ConnectionPool<T>>,
        opts: DownloadOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, SessionError> {
        let template = NameTemplate::parse(&opts.template)?;
        let groups = collect_groups(opts.groups, opts.desc);
        if groups.is_empty() {
            return Err(SessionError::EmptySource);
        }

        let pre_sum = pre_sum(&groups);
        let total = groups.iter().map(|g| g.messages.len()).sum();
        let fingerprint = resume::fingerprint(
            groups.iter().map(|g| (&g.peer, g.messages.as_slice())),
            opts.desc,
        );

        let transport = pool.transport();
        let lookups = try_join_all(groups.into_iter().map(|group| async move {
            let peer = transport
                .resolve_peer(&group.peer)
                .await
                .map_err(|source| SessionError::ResolvePeer {
                    peer: group.peer.clone(),
                    source,
                })?;
            debug!(peer = %group.peer, messages = group.messages.len(), "Resolved group");
            Ok::<_, SessionError>(ResolvedGroup {
                peer,
                messages: group.messages,
            })
        }));
        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            resolved = lookups => resolved?,
        };

        info!(
            groups = resolved.len(),
            total,
            fingerprint = %fingerprint,
            "Download session prepared"
        );

        Ok(Self {
            pool,
            groups: resolved,
            pre_sum,
            total,
            filter: ExtFilter::new(&opts.include, &opts.exclude),
            template,
            bulk: opts.bulk,
            fingerprint,
            state: Mutex::new(State {
                group: 0,
                next_index: 0,
                finished: FinishedSet::new(),
            }),
            session: None,
            persist: tokio::sync::Mutex::new(()),
        })
    }

    /// Persist finished ids through `session`
    pub fn with_session(mut self, session: ResumeSession) -> Self {
        self.session = Some(Arc::new(session));
        self
    }

    /// Load this session's finished set from `storage` and persist into it
    ///
    /// A stored record written under another fingerprint is a setup error.
    pub fn attach_store(self, storage: &SharedStorage) -> Result<Self, SessionError> {
        let session = ResumeSession::open(storage, &self.fingerprint)?;
        if let Some(finished) = session.load()? {
            info!(
                fingerprint = %self.fingerprint,
                finished = finished.len(),
                total = self.total,
                "Resuming download session"
            );
            self.set_finished(finished);
        }
        Ok(self.with_session(session))
    }

    /// Attached checkpoint session, if any
    pub fn session(&self) -> Option<&ResumeSession> {
        self.session.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State is updated with single assignments, so a poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<T: Transport> ResumableIter for DownloadIter<T> {
    fn claim(&self) -> Option<Position> {
        let mut state = self.lock();
        let group = self.groups.get(state.group)?;
        let position = Position {
            group: state.group,
            index: state.next_index,
        };
        state.next_index += 1;
        if state.next_index >= group.messages.len() {
            state.group += 1;
            state.next_index = 0;
        }
        Some(position)
    }

    async fn resolve(
        &self,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<WorkItem, IterError> {
        let id = self.id_of(position);
        if self.lock().finished.contains(&id) {
            debug!(id, "Already finished, skipping");
            return Err(IterError::Skip);
        }

        let group = &self.groups[position.group];
        let msg_id = group.messages[position.index];

        let client = self.pool.default_client(cancel).await.map_err(|e| {
            if e.is_cancelled() {
                IterError::Cancelled
            } else {
                IterError::ResolveError(e.to_string())
            }
        })?;
        let transport = self.pool.transport();
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IterError::Cancelled),
            message = transport.resolve_message(&client, &group.peer, msg_id) => message?,
        };

        let Some(media) = transport.extract_media(&message) else {
            debug!(id, peer = group.peer.id, message = msg_id, "Message has no media, skipping");
            return Err(IterError::Skip);
        };
        if !self.filter.allows(&media.name) {
            debug!(id, file = %media.name, "Filtered out by extension");
            return Err(IterError::Skip);
        }

        let name = self.template.render(&NameContext {
            dialog_id: group.peer.id,
            message_id: message.id,
            message_date: message.date,
            file_name: media.name.clone(),
            file_size: format_binary_bytes(media.size),
            download_date: chrono::Utc::now().timestamp(),
            author_id: message.author_id.unwrap_or(0),
        })?;

        Ok(WorkItem {
            id,
            peer: group.peer.id,
            message: message.id,
            dc: media.dc,
            size: media.size,
            location: media.location,
            file_name: media.name,
            name,
            bulk: self.bulk,
        })
    }

    fn id_of(&self, position: Position) -> usize {
        self.pre_sum[position.group] + position.index
    }

    async fn finish(&self, id: usize) -> Result<(), IterError> {
        // Saves are serialized so an older snapshot never overwrites a newer one.
        let _persist = self.persist.lock().await;
        let snapshot = {
            let mut state = self.lock();
            if !state.finished.insert(id) {
                return Ok(());
            }
            self.session.as_ref().map(|_| state.finished.clone())
        };
        let (Some(session), Some(finished)) = (self.session.clone(), snapshot) else {
            return Ok(());
        };
        // Store writes fsync; keep them off the runtime workers.
        tokio::task::spawn_blocking(move || session.save(&finished))
            .await
            .map_err(|e| IterError::CheckpointError(format!("checkpoint task failed: {e}")))??;
        Ok(())
    }

    fn total(&self) -> usize {
        let _state = self.lock();
        self.total
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn set_finished(&self, finished: FinishedSet) {
        self.lock().finished = finished;
    }

    fn finished(&self) -> FinishedSet {
        self.lock().finished.clone()
    }
}
