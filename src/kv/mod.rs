//! Checkpoint store: pluggable, namespaced key/value persistence
//!
//! A [`Storage`] backend owns a set of namespaces, each a mapping of string
//! keys to opaque byte values. Backends are interchangeable; the whole
//! content of one backend can be dumped with [`Storage::migrate_to`] and
//! loaded into another with [`Storage::migrate_from`].
//!
//! Backends are selected through an explicit [`Registry`] mapping driver
//! names to constructors:
//!
//! - [`Driver::Legacy`] - one embedded database directory per namespace
//! - [`Driver::Embedded`] - a single embedded database, one tree per namespace
//! - [`Driver::File`] - a single JSON document written atomically
//!
//! ```no_run
//! use courier::kv::{Registry, Driver, StorageOptions};
//!
//! # fn example() -> Result<(), courier::kv::KvError> {
//! let registry = Registry::builtin();
//! let storage = registry.open(Driver::File, &StorageOptions::with_path("./state.json"))?;
//! let kv = storage.open("resume")?;
//! kv.set("key", b"value")?;
//! # Ok(())
//! # }
//! ```

pub mod embedded;
pub mod file;
pub mod legacy;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Full dump of a backend: namespace -> key -> value
pub type Meta = HashMap<String, HashMap<String, Vec<u8>>>;

/// Option key naming the driver in a string map
pub const DRIVER_TYPE_KEY: &str = "type";

/// Option key naming the backend location
pub const PATH_KEY: &str = "path";

/// Checkpoint store errors
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// Key does not exist in the namespace
    #[error("key not found")]
    NotFound,

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Error reported by the backend engine
    #[error("backend error: {0}")]
    BackendError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),

    /// Driver name is not registered
    #[error("unsupported driver: {0}")]
    UnsupportedDriver(String),

    /// Missing or malformed backend option
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

impl KvError {
    /// Whether this error only signals an absent key
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotFound)
    }
}

/// Result type for store operations
pub type KvResult<T> = Result<T, KvError>;

/// A single namespace
pub trait Kv: Send + Sync {
    /// Read the value stored under `key`, or [`KvError::NotFound`]
    fn get(&self, key: &str) -> KvResult<Vec<u8>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &[u8]) -> KvResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> KvResult<()>;
}

/// An opened backend
pub trait Storage: Send + Sync {
    /// Driver name of this backend
    fn name(&self) -> &'static str;

    /// Dump every namespace and key
    fn migrate_to(&self) -> KvResult<Meta>;

    /// Bulk-load a dump produced by [`Storage::migrate_to`]
    fn migrate_from(&self, meta: Meta) -> KvResult<()>;

    /// Enumerate existing namespaces
    fn namespaces(&self) -> KvResult<Vec<String>>;

    /// Open (creating if needed) a namespace
    fn open(&self, namespace: &str) -> KvResult<Arc<dyn Kv>>;

    /// Flush and release backend resources
    fn close(&self) -> KvResult<()>;
}

/// Shared handle to an opened backend
pub type SharedStorage = Arc<dyn Storage>;

/// Registered backend drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Driver {
    /// Legacy layout: one embedded database per namespace directory
    Legacy,
    /// Single embedded transactional database
    Embedded,
    /// Single plain JSON file
    File,
}

impl Driver {
    /// All drivers known to the builtin registry
    pub const ALL: [Driver; 3] = [Driver::Legacy, Driver::Embedded, Driver::File];

    /// Canonical driver name
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Legacy => "legacy",
            Driver::Embedded => "embedded",
            Driver::File => "file",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Driver {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Driver::Legacy),
            "embedded" | "bolt" => Ok(Driver::Embedded),
            "file" => Ok(Driver::File),
            other => Err(KvError::UnsupportedDriver(other.to_string())),
        }
    }
}

/// Backend options as a flat string map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    values: HashMap<String, String>,
}

impl StorageOptions {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Option set carrying only a backend path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let mut opts = Self::new();
        opts.insert(PATH_KEY, path.into().to_string_lossy().into_owned());
        opts
    }

    /// Set an option
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Read an option
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Required backend path
    pub fn path(&self) -> KvResult<PathBuf> {
        self.get(PATH_KEY)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| KvError::InvalidOption(format!("missing `{PATH_KEY}` option")))
    }

    /// Parse `key=value,key=value` as accepted on the command line
    pub fn parse(input: &str) -> KvResult<Self> {
        let mut opts = Self::new();
        for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| KvError::InvalidOption(format!("expected key=value, got `{pair}`")))?;
            opts.insert(key.trim(), value.trim());
        }
        Ok(opts)
    }
}

impl From<HashMap<String, String>> for StorageOptions {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

/// Backend constructor
pub type Constructor = fn(&StorageOptions) -> KvResult<SharedStorage>;

/// Explicit driver name -> constructor mapping
#[derive(Clone)]
pub struct Registry {
    drivers: HashMap<Driver, Constructor>,
}

impl Registry {
    /// Registry without any driver
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Registry with the three builtin drivers
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Driver::Legacy, legacy::LegacyStorage::open_shared);
        registry.register(Driver::Embedded, embedded::EmbeddedStorage::open_shared);
        registry.register(Driver::File, file::FileStorage::open_shared);
        registry
    }

    /// Register (or replace) a constructor
    pub fn register(&mut self, driver: Driver, constructor: Constructor) {
        self.drivers.insert(driver, constructor);
    }

    /// Open a backend with the given driver
    pub fn open(&self, driver: Driver, opts: &StorageOptions) -> KvResult<SharedStorage> {
        let constructor = self
            .drivers
            .get(&driver)
            .ok_or_else(|| KvError::UnsupportedDriver(driver.to_string()))?;
        tracing::debug!(driver = %driver, "Opening checkpoint store");
        constructor(opts)
    }

    /// Open a backend from a string map whose `type` entry names the driver
    pub fn open_with_map(&self, opts: &StorageOptions) -> KvResult<SharedStorage> {
        let driver: Driver = opts
            .get(DRIVER_TYPE_KEY)
            .ok_or_else(|| KvError::InvalidOption(format!("missing `{DRIVER_TYPE_KEY}` option")))?
            .parse()?;
        self.open(driver, opts)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.drivers.keys().map(Driver::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("drivers", &names).finish()
    }
}

/// Copy every namespace of `from` into `to`
pub fn migrate(from: &dyn Storage, to: &dyn Storage) -> KvResult<usize> {
    let meta = from.migrate_to()?;
    let keys = meta.values().map(HashMap::len).sum();
    tracing::info!(
        from = from.name(),
        to = to.name(),
        namespaces = meta.len(),
        keys,
        "Migrating checkpoint store"
    );
    to.migrate_from(meta)?;
    Ok(keys)
}
