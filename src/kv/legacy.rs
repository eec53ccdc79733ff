//! Legacy backend layout
//!
//! Older installs kept each namespace in its own embedded database under a
//! shared data directory (`<path>/<namespace>/`). The layout is still readable
//! and writable so that sessions can be migrated out of it.

use super::embedded::{dump_tree, TreeKv};
use super::{Kv, KvError, KvResult, Meta, SharedStorage, Storage, StorageOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Directory of per-namespace databases
pub struct LegacyStorage {
    root: PathBuf,
    dbs: Mutex<HashMap<String, sled::Db>>,
}

impl LegacyStorage {
    /// Open (creating if needed) the data directory at `root`
    pub fn open_path(root: &Path) -> KvResult<Self> {
        std::fs::create_dir_all(root).map_err(|e| KvError::IoError(e.to_string()))?;
        info!(path = %root.display(), "Opened legacy checkpoint store");
        Ok(Self {
            root: root.to_path_buf(),
            dbs: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn open_shared(opts: &StorageOptions) -> KvResult<SharedStorage> {
        Ok(Arc::new(Self::open_path(&opts.path()?)?))
    }

    /// Database for `namespace`, opened once per process
    fn db(&self, namespace: &str) -> KvResult<sled::Db> {
        validate_namespace(namespace)?;
        let mut dbs = self
            .dbs
            .lock()
            .map_err(|e| KvError::LockError(e.to_string()))?;
        if let Some(db) = dbs.get(namespace) {
            return Ok(db.clone());
        }
        let path = self.root.join(namespace);
        debug!(path = %path.display(), "Opening legacy namespace database");
        let db = sled::open(&path)?;
        dbs.insert(namespace.to_string(), db.clone());
        Ok(db)
    }
}

fn validate_namespace(namespace: &str) -> KvResult<()> {
    if namespace.is_empty()
        || namespace.starts_with('.')
        || namespace.contains(['/', '\\'])
    {
        return Err(KvError::InvalidOption(format!(
            "namespace `{namespace}` is not a valid directory name"
        )));
    }
    Ok(())
}

impl Storage for LegacyStorage {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn migrate_to(&self) -> KvResult<Meta> {
        let mut meta = Meta::new();
        for namespace in self.namespaces()? {
            let db = self.db(&namespace)?;
            meta.insert(namespace, dump_tree(&db)?);
        }
        Ok(meta)
    }

    fn migrate_from(&self, meta: Meta) -> KvResult<()> {
        for (namespace, pairs) in meta {
            let db = self.db(&namespace)?;
            let mut batch = sled::Batch::default();
            for (key, value) in pairs {
                batch.insert(key.as_bytes(), value);
            }
            db.apply_batch(batch)?;
            db.flush()?;
        }
        Ok(())
    }

    fn namespaces(&self) -> KvResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| KvError::IoError(e.to_string()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KvError::IoError(e.to_string()))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| KvError::IoError(e.to_string()))?
                .is_dir();
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_namespace(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, namespace: &str) -> KvResult<Arc<dyn Kv>> {
        let db = self.db(namespace)?;
        // A sled::Db derefs to its default tree.
        Ok(Arc::new(TreeKv { tree: (*db).clone() }))
    }

    fn close(&self) -> KvResult<()> {
        let dbs = self
            .dbs
            .lock()
            .map_err(|e| KvError::LockError(e.to_string()))?;
        for db in dbs.values() {
            db.flush()?;
        }
        Ok(())
    }
}
