//! Plain-file backend
//!
//! Keeps the whole store in memory and rewrites a single JSON document on
//! every mutation. Writes go through a temp file in the same directory that is
//! synced and atomically renamed over the target, while an advisory lock on a
//! sibling `.lock` file coordinates concurrent processes. A mutation re-reads
//! the file under that lock and applies itself to what is on disk, so writers
//! sharing one file never drop each other's keys.

use super::{Kv, KvError, KvResult, Meta, SharedStorage, Storage, StorageOptions};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fd_lock::RwLock as FileLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Current document schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed store file size (64 MB) to prevent memory exhaustion
pub const MAX_STORE_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// On-disk document. Values are base64 so arbitrary bytes survive JSON.
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    schema_version: String,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
}

struct Inner {
    path: PathBuf,
    data: RwLock<Meta>,
}

/// Single JSON file holding every namespace
pub struct FileStorage {
    inner: Arc<Inner>,
}

impl FileStorage {
    /// Open the store at `path`, loading it if the file exists
    pub fn open_path(path: &Path) -> KvResult<Self> {
        let data = if path.exists() {
            load(path)?
        } else {
            debug!(path = %path.display(), "No store file yet, starting empty");
            Meta::new()
        };
        info!(
            path = %path.display(),
            namespaces = data.len(),
            "Opened file checkpoint store"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                path: path.to_path_buf(),
                data: RwLock::new(data),
            }),
        })
    }

    pub(crate) fn open_shared(opts: &StorageOptions) -> KvResult<SharedStorage> {
        Ok(Arc::new(Self::open_path(&opts.path()?)?))
    }
}

impl Inner {
    /// Reload, apply `mutate` and persist the result under both write locks
    fn update<F>(&self, mutate: F) -> KvResult<()>
    where
        F: FnOnce(&mut Meta),
    {
        let mut data = self
            .data
            .write()
            .map_err(|e| KvError::LockError(e.to_string()))?;

        std::fs::create_dir_all(parent_dir(&self.path))
            .map_err(|e| KvError::IoError(e.to_string()))?;
        let mut lock = lock_file(&self.path)?;
        let _guard = lock
            .write()
            .map_err(|e| KvError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let mut next = if self.path.exists() {
            read_document(&self.path)?
        } else {
            data.clone()
        };
        mutate(&mut next);
        write_document(&self.path, &next)?;
        *data = next;
        Ok(())
    }
}

fn lock_file(path: &Path) -> KvResult<FileLock<std::fs::File>> {
    let lock_path = path.with_extension("lock");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| KvError::LockError(format!("Failed to create lock file: {e}")))?;
    Ok(FileLock::new(file))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn load(path: &Path) -> KvResult<Meta> {
    let lock = lock_file(path)?;
    let _guard = lock
        .read()
        .map_err(|e| KvError::LockError(format!("Failed to acquire read lock: {e}")))?;
    read_document(path)
}

/// Parse the store file; the caller holds the file lock
fn read_document(path: &Path) -> KvResult<Meta> {
    let metadata = std::fs::metadata(path).map_err(|e| KvError::IoError(e.to_string()))?;
    if metadata.len() > MAX_STORE_FILE_SIZE {
        return Err(KvError::IoError(format!(
            "store file too large: {} bytes (max: {MAX_STORE_FILE_SIZE} bytes)",
            metadata.len()
        )));
    }

    let contents = std::fs::read_to_string(path).map_err(|e| KvError::IoError(e.to_string()))?;
    let document: Document = serde_json::from_str(&contents).map_err(|e| {
        warn!(error = %e, "Failed to deserialize store file");
        KvError::SerializationError(e.to_string())
    })?;
    if document.schema_version != SCHEMA_VERSION {
        return Err(KvError::SerializationError(format!(
            "schema version mismatch: expected {SCHEMA_VERSION}, found {}",
            document.schema_version
        )));
    }

    let mut meta = Meta::new();
    for (namespace, pairs) in document.namespaces {
        let mut decoded = HashMap::with_capacity(pairs.len());
        for (key, value) in pairs {
            let bytes = STANDARD
                .decode(value.as_bytes())
                .map_err(|e| KvError::SerializationError(format!("key `{key}`: {e}")))?;
            decoded.insert(key, bytes);
        }
        meta.insert(namespace, decoded);
    }
    Ok(meta)
}

/// Atomically replace the store file; the caller holds the write lock
fn write_document(path: &Path, meta: &Meta) -> KvResult<()> {
    let namespaces = meta
        .iter()
        .map(|(ns, pairs)| {
            let encoded = pairs
                .iter()
                .map(|(k, v)| (k.clone(), STANDARD.encode(v)))
                .collect();
            (ns.clone(), encoded)
        })
        .collect();
    let document = Document {
        schema_version: SCHEMA_VERSION.to_string(),
        namespaces,
    };
    let json = serde_json::to_string_pretty(&document)
        .map_err(|e| KvError::SerializationError(e.to_string()))?;

    let dir = parent_dir(path);
    let mut temp_file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| KvError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| KvError::IoError(format!("Failed to write to temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| KvError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| KvError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| KvError::IoError(format!("Failed to persist temp file: {e}")))?;

    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

impl Storage for FileStorage {
    fn name(&self) -> &'static str {
        "file"
    }

    fn migrate_to(&self) -> KvResult<Meta> {
        let data = self
            .inner
            .data
            .read()
            .map_err(|e| KvError::LockError(e.to_string()))?;
        Ok(data.clone())
    }

    fn migrate_from(&self, meta: Meta) -> KvResult<()> {
        self.inner.update(|data| {
            for (namespace, pairs) in meta {
                data.entry(namespace).or_default().extend(pairs);
            }
        })
    }

    fn namespaces(&self) -> KvResult<Vec<String>> {
        let data = self
            .inner
            .data
            .read()
            .map_err(|e| KvError::LockError(e.to_string()))?;
        let mut names: Vec<_> = data.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn open(&self, namespace: &str) -> KvResult<Arc<dyn Kv>> {
        Ok(Arc::new(FileKv {
            inner: self.inner.clone(),
            namespace: namespace.to_string(),
        }))
    }

    fn close(&self) -> KvResult<()> {
        Ok(())
    }
}

struct FileKv {
    inner: Arc<Inner>,
    namespace: String,
}

impl Kv for FileKv {
    fn get(&self, key: &str) -> KvResult<Vec<u8>> {
        let data = self
            .inner
            .data
            .read()
            .map_err(|e| KvError::LockError(e.to_string()))?;
        data.get(&self.namespace)
            .and_then(|pairs| pairs.get(key))
            .cloned()
            .ok_or(KvError::NotFound)
    }

    fn set(&self, key: &str, value: &[u8]) -> KvResult<()> {
        self.inner.update(|data| {
            data.entry(self.namespace.clone())
                .or_default()
                .insert(key.to_string(), value.to_vec());
        })
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        self.inner.update(|data| {
            if let Some(pairs) = data.get_mut(&self.namespace) {
                pairs.remove(key);
            }
        })
    }
}
