//! Download destination files

use crate::transport::WriteAt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Positional writer over a temp file, reporting bytes written to `on_write`
pub struct FileSink<F> {
    file: Mutex<File>,
    written: AtomicU64,
    on_write: F,
}

impl<F> FileSink<F>
where
    F: Fn(u64) + Send + Sync,
{
    /// Create (truncating) the file at `path`
    pub fn create(path: &Path, on_write: F) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            written: AtomicU64::new(0),
            on_write,
        })
    }

    /// Flush and sync the file to disk
    pub fn sync(&self) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("sink lock poisoned"))?;
        file.flush()?;
        file.sync_all()
    }
}

impl<F> WriteAt for FileSink<F>
where
    F: Fn(u64) + Send + Sync,
{
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        {
            let mut file = self
                .file
                .lock()
                .map_err(|_| io::Error::other("sink lock poisoned"))?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)?;
        }
        let total = self.written.fetch_add(buf.len() as u64, Ordering::Relaxed) + buf.len() as u64;
        (self.on_write)(total);
        Ok(buf.len())
    }
}

/// `<dir>/<name>` and its `.tmp` sibling
#[derive(Debug, Clone)]
pub struct Destination {
    /// Final path
    pub path: PathBuf,
    /// Path written while the transfer runs
    pub temp: PathBuf,
}

impl Destination {
    /// Destination for `name` inside `dir`
    ///
    /// Rejects names that are empty, absolute, or contain `..` components.
    pub fn new(dir: &Path, name: &str) -> io::Result<Self> {
        let relative = Path::new(name);
        let escapes = relative.components().any(|c| {
            !matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir)
        });
        if name.trim().is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid destination name `{name}`"),
            ));
        }
        let path = dir.join(relative);
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        Ok(Self {
            path,
            temp: PathBuf::from(temp),
        })
    }

    /// Make sure the parent directory exists
    pub fn prepare(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Move the finished temp file into place
    pub fn commit(&self) -> io::Result<()> {
        std::fs::rename(&self.temp, &self.path)?;
        debug!(path = %self.path.display(), "Download committed");
        Ok(())
    }

    /// Remove the temp file of a failed transfer
    pub fn discard(&self) {
        match std::fs::remove_file(&self.temp) {
            Ok(()) => debug!(path = %self.temp.display(), "Removed partial download"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.temp.display(), error = %e, "Failed to remove partial download"),
        }
    }
}
