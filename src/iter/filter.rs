//! File-extension include/exclude filter

use std::collections::HashSet;
use std::path::Path;

/// Extension filter applied to resolved media names
///
/// Extensions are compared lower-cased and dot-prefixed, so `JPG`, `.jpg`
/// and `jpg` are the same entry. The include list is checked first: when it
/// is non-empty the extension must be on it. The exclude list then rejects
/// anything it names, so an extension on both lists is rejected.
#[derive(Debug, Clone, Default)]
pub struct ExtFilter {
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl ExtFilter {
    /// Build a filter from raw extension lists
    pub fn new<I, E, S1, S2>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S1>,
        E: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        Self {
            include: normalize_all(include),
            exclude: normalize_all(exclude),
        }
    }

    /// Whether a file called `name` passes the filter
    pub fn allows(&self, name: &str) -> bool {
        let ext = extension_of(name);
        if !self.include.is_empty() && !self.include.contains(&ext) {
            return false;
        }
        !self.exclude.contains(&ext)
    }
}

fn normalize_all<I, S>(exts: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    exts.into_iter()
        .map(|e| normalize(e.as_ref()))
        .filter(|e| e.len() > 1)
        .collect()
}

fn normalize(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

/// Lower-cased, dot-prefixed extension of `name` (empty when it has none)
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}
