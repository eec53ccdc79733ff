//! Linear upload source
//!
//! Files are opened one at a time as the executor pulls them. Unlike the
//! download source, nothing is skipped or retried: the first file that cannot
//! be opened, or a thumbnail that is not an image, ends the whole iteration.

use super::{IterError, LinearIter};
use crate::transport::PeerHandle;
use async_trait::async_trait;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A local file to upload, with an optional thumbnail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// File to upload
    pub path: PathBuf,
    /// Thumbnail image shown by clients
    pub thumb: Option<PathBuf>,
}

impl UploadFile {
    /// Upload `path` without a thumbnail
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            thumb: None,
        }
    }

    /// Attach a thumbnail
    pub fn with_thumb(mut self, thumb: impl Into<PathBuf>) -> Self {
        self.thumb = Some(thumb.into());
        self
    }
}

/// Options shared by every upload of a run
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Destination conversation
    pub to: PeerHandle,
    /// Send images as photos instead of documents
    pub as_photo: bool,
    /// Delete the local file after a successful upload
    pub remove_after_upload: bool,
}

/// An opened local file
#[derive(Debug)]
pub struct OpenedFile {
    /// Open handle
    pub file: File,
    /// Where it was opened from
    pub path: PathBuf,
    /// Size in bytes at open time
    pub size: u64,
}

impl OpenedFile {
    fn open(path: &Path) -> Result<Self, IterError> {
        let file = File::open(path)
            .map_err(|e| IterError::IoError(format!("open {}: {e}", path.display())))?;
        let size = file
            .metadata()
            .map_err(|e| IterError::IoError(format!("stat {}: {e}", path.display())))?
            .len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }
}

/// One upload ready for the transport
#[derive(Debug)]
pub struct UploadElem {
    /// Primary file
    pub file: OpenedFile,
    /// Validated thumbnail
    pub thumb: Option<OpenedFile>,
    /// Destination conversation
    pub to: PeerHandle,
    /// Send as photo
    pub as_photo: bool,
    /// Delete the local file after upload
    pub remove: bool,
}

impl fmt::Display for UploadElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.file.path.display(), self.to.id)
    }
}

/// Open `path` as a thumbnail, requiring image content
fn open_thumb(path: &Path) -> Result<OpenedFile, IterError> {
    let invalid = |reason: String| IterError::InvalidThumbnail {
        path: path.display().to_string(),
        reason,
    };
    let kind = infer::get_from_path(path).map_err(|e| invalid(e.to_string()))?;
    match kind {
        Some(kind) if kind.mime_type().starts_with("image/") => {
            debug!(path = %path.display(), mime = kind.mime_type(), "Thumbnail accepted");
        }
        Some(kind) => return Err(invalid(format!("not an image ({})", kind.mime_type()))),
        None => return Err(invalid("unknown content type".to_string())),
    }
    OpenedFile::open(path)
}

/// Sequential iterator over files to upload
pub struct UploadIter {
    files: Vec<UploadFile>,
    opts: UploadOptions,
    cur: usize,
    err: Option<IterError>,
    value: Option<UploadElem>,
}

impl UploadIter {
    /// Iterate over `files`, uploading each according to `opts`
    pub fn new(files: Vec<UploadFile>, opts: UploadOptions) -> Self {
        Self {
            files,
            opts,
            cur: 0,
            err: None,
            value: None,
        }
    }

    /// Number of files
    pub fn total(&self) -> usize {
        self.files.len()
    }

    fn fail(&mut self, err: IterError) -> bool {
        warn!(error = %err, "Upload iteration stopped");
        self.err = Some(err);
        false
    }
}

#[async_trait]
impl LinearIter for UploadIter {
    type Item = UploadElem;

    async fn next(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return self.fail(IterError::Cancelled);
        }
        if self.err.is_some() || self.cur >= self.files.len() {
            return false;
        }

        let current = self.files[self.cur].clone();
        self.cur += 1;

        let file = match OpenedFile::open(&current.path) {
            Ok(file) => file,
            Err(e) => return self.fail(e),
        };
        let thumb = match current.thumb.as_deref().map(open_thumb).transpose() {
            Ok(thumb) => thumb,
            Err(e) => return self.fail(e),
        };

        self.value = Some(UploadElem {
            file,
            thumb,
            to: self.opts.to.clone(),
            as_photo: self.opts.as_photo,
            remove: self.opts.remove_after_upload,
        });
        true
    }

    fn value(&mut self) -> Option<UploadElem> {
        self.value.take()
    }

    fn err(&self) -> Option<&IterError> {
        self.err.as_ref()
    }
}
