//! Finished-set persistence for resumable sessions
//!
//! A session is identified by its fingerprint. Its finished ids are stored as
//! one JSON record under `resume:<fingerprint>` in the `resume` namespace of
//! the injected checkpoint store.

use crate::kv::{Kv, KvError, SharedStorage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current record schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Namespace holding download sessions
pub const RESUME_NAMESPACE: &str = "resume";

/// Ids already transferred in a session
pub type FinishedSet = BTreeSet<usize>;

/// Store key for the session with `fingerprint`
pub fn resume_key(fingerprint: &str) -> String {
    format!("resume:{fingerprint}")
}

/// Persisted form of a finished set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedRecord {
    schema_version: String,
    fingerprint: String,
    finished: Vec<usize>,
    created_at: i64,
    updated_at: i64,
}

impl FinishedRecord {
    /// Create a record stamped with the current time
    pub fn new(fingerprint: String, finished: &FinishedSet) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            fingerprint,
            finished: finished.iter().copied().collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the fingerprint
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Get the finished ids
    pub fn finished(&self) -> FinishedSet {
        self.finished.iter().copied().collect()
    }

    /// Creation time (Unix millis)
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last update time (Unix millis)
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }
}

/// Errors related to resume state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Stored record belongs to a different session layout
    #[error("fingerprint mismatch: expected {expected}, found {found}")]
    FingerprintMismatch {
        /// Fingerprint of the current session
        expected: String,
        /// Fingerprint found in the record
        found: String,
    },

    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Checkpoint store failure
    #[error("store error: {0}")]
    StoreError(#[from] KvError),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),
}

/// Handle on one session's record in the checkpoint store
pub struct ResumeSession {
    kv: Arc<dyn Kv>,
    key: String,
    fingerprint: String,
    created_at: AtomicI64,
}

impl std::fmt::Debug for ResumeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeSession")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ResumeSession {
    /// Bind to the record of `fingerprint` in `storage`
    pub fn open(storage: &SharedStorage, fingerprint: &str) -> Result<Self, ResumeError> {
        let kv = storage.open(RESUME_NAMESPACE)?;
        Ok(Self::with_kv(kv, fingerprint))
    }

    /// Bind to the record of `fingerprint` in an already opened namespace
    pub fn with_kv(kv: Arc<dyn Kv>, fingerprint: &str) -> Self {
        Self {
            kv,
            key: resume_key(fingerprint),
            fingerprint: fingerprint.to_string(),
            created_at: AtomicI64::new(0),
        }
    }

    /// Session fingerprint
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Store key of the record
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the stored finished set, `None` for a fresh session
    pub fn load(&self) -> Result<Option<FinishedSet>, ResumeError> {
        debug!(key = %self.key, "Loading resume record");
        let bytes = match self.kv.get(&self.key) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                debug!(key = %self.key, "No resume record, starting fresh");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let record: FinishedRecord = serde_json::from_slice(&bytes).map_err(|e| {
            warn!(error = %e, "Failed to deserialize resume record");
            ResumeError::DeserializationError(e.to_string())
        })?;
        record.validate_schema_version()?;
        if record.fingerprint != self.fingerprint {
            warn!(
                expected = %self.fingerprint,
                found = %record.fingerprint,
                "Resume record fingerprint mismatch"
            );
            return Err(ResumeError::FingerprintMismatch {
                expected: self.fingerprint.clone(),
                found: record.fingerprint,
            });
        }

        self.created_at.store(record.created_at, Ordering::Relaxed);
        let finished = record.finished();
        info!(
            fingerprint = %self.fingerprint,
            finished = finished.len(),
            "Resume record loaded"
        );
        Ok(Some(finished))
    }

    /// Persist `finished`, replacing the stored record
    pub fn save(&self, finished: &FinishedSet) -> Result<(), ResumeError> {
        let mut record = FinishedRecord::new(self.fingerprint.clone(), finished);
        let created_at = self.created_at.load(Ordering::Relaxed);
        if created_at == 0 {
            self.created_at.store(record.created_at, Ordering::Relaxed);
        } else {
            record.created_at = created_at;
        }

        let json = serde_json::to_vec(&record)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;
        self.kv.set(&self.key, &json)?;
        debug!(key = %self.key, finished = finished.len(), "Resume record saved");
        Ok(())
    }

    /// Forget the session; the next run starts from scratch
    pub fn reset(&self) -> Result<(), ResumeError> {
        self.kv.delete(&self.key)?;
        self.created_at.store(0, Ordering::Relaxed);
        info!(key = %self.key, "Resume record reset");
        Ok(())
    }
}
