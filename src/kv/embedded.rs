//! Embedded single-database backend
//!
//! All namespaces live in one sled database; each namespace is a tree.
//! Bulk loads are applied as one atomic batch per namespace.

use super::{Kv, KvError, KvResult, Meta, SharedStorage, Storage, StorageOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Name of sled's implicit default tree, which never holds our data
const DEFAULT_TREE: &[u8] = b"__sled__default";

impl From<sled::Error> for KvError {
    fn from(e: sled::Error) -> Self {
        match e {
            sled::Error::Io(io) => KvError::IoError(io.to_string()),
            other => KvError::BackendError(other.to_string()),
        }
    }
}

/// One sled database holding every namespace
pub struct EmbeddedStorage {
    db: sled::Db,
}

impl EmbeddedStorage {
    /// Open or create the database at `path`
    pub fn open_path(path: &Path) -> KvResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KvError::IoError(e.to_string()))?;
        }
        let db = sled::open(path)?;
        info!(path = %path.display(), "Opened embedded checkpoint store");
        Ok(Self { db })
    }

    pub(crate) fn open_shared(opts: &StorageOptions) -> KvResult<SharedStorage> {
        Ok(Arc::new(Self::open_path(&opts.path()?)?))
    }
}

impl Storage for EmbeddedStorage {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn migrate_to(&self) -> KvResult<Meta> {
        let mut meta = Meta::new();
        for namespace in self.namespaces()? {
            let tree = self.db.open_tree(namespace.as_bytes())?;
            meta.insert(namespace, dump_tree(&tree)?);
        }
        Ok(meta)
    }

    fn migrate_from(&self, meta: Meta) -> KvResult<()> {
        for (namespace, pairs) in meta {
            let tree = self.db.open_tree(namespace.as_bytes())?;
            let mut batch = sled::Batch::default();
            for (key, value) in pairs {
                batch.insert(key.as_bytes(), value);
            }
            tree.apply_batch(batch)?;
            debug!(namespace = %namespace, "Loaded namespace batch");
        }
        self.db.flush()?;
        Ok(())
    }

    fn namespaces(&self) -> KvResult<Vec<String>> {
        let mut names = Vec::new();
        for name in self.db.tree_names() {
            if name.as_ref() == DEFAULT_TREE {
                continue;
            }
            names.push(String::from_utf8_lossy(&name).into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, namespace: &str) -> KvResult<Arc<dyn Kv>> {
        let tree = self.db.open_tree(namespace.as_bytes())?;
        Ok(Arc::new(TreeKv { tree }))
    }

    fn close(&self) -> KvResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Collect every key/value pair of a tree
pub(crate) fn dump_tree(tree: &sled::Tree) -> KvResult<std::collections::HashMap<String, Vec<u8>>> {
    let mut pairs = std::collections::HashMap::new();
    for entry in tree.iter() {
        let (key, value) = entry?;
        pairs.insert(String::from_utf8_lossy(&key).into_owned(), value.to_vec());
    }
    Ok(pairs)
}

/// Namespace view over one sled tree
pub(crate) struct TreeKv {
    pub(crate) tree: sled::Tree,
}

impl Kv for TreeKv {
    fn get(&self, key: &str) -> KvResult<Vec<u8>> {
        self.tree
            .get(key.as_bytes())?
            .map(|v| v.to_vec())
            .ok_or(KvError::NotFound)
    }

    fn set(&self, key: &str, value: &[u8]) -> KvResult<()> {
        self.tree.insert(key.as_bytes(), value)?;
        self.tree.flush()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        self.tree.remove(key.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}
