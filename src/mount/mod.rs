//! Mount points expose installed package content as a virtual file tree.
//!
//! A mount locator is an opaque string carried by a package source; only
//! this module interprets it. Consumers read template metadata through the
//! [`MountPoint`] capability and never touch the filesystem directly.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use crate::runtime::Runtime;

/// Kind of an entry inside a mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountEntryKind {
    File,
    Directory,
}

/// A named entry inside a mount point directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub name: String,
    pub kind: MountEntryKind,
}

/// Read-only view over a package's content.
///
/// Paths are relative to the mount root and use `/` separators; the empty
/// path denotes the root itself.
#[cfg_attr(test, mockall::automock)]
pub trait MountPoint: Send + Sync {
    /// The locator this mount point was opened from (as received, not normalized).
    fn uri(&self) -> &str;

    /// Read a file's contents.
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// List the entries of a directory.
    fn list_dir(&self, path: &str) -> Result<Vec<MountEntry>>;

    /// Look up an entry without reading it. Returns `None` if absent.
    fn stat(&self, path: &str) -> Option<MountEntryKind>;
}

/// Mount point backed by a plain directory on disk.
pub struct DirectoryMount<R: Runtime> {
    runtime: Arc<R>,
    root: PathBuf,
    uri: String,
}

impl<R: Runtime> DirectoryMount<R> {
    pub fn new(runtime: Arc<R>, uri: &str) -> Result<Self> {
        let root = PathBuf::from(uri);
        if !runtime.is_dir(&root) {
            return Err(anyhow!("Mount locator is not a directory: {}", uri));
        }
        Ok(Self {
            runtime,
            root,
            uri: uri.to_string(),
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl<R: Runtime> MountPoint for DirectoryMount<R> {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        self.runtime
            .read(&full)
            .with_context(|| format!("Failed to read {} from mount {}", path, self.uri))
    }

    fn list_dir(&self, path: &str) -> Result<Vec<MountEntry>> {
        let full = self.resolve(path);
        let mut entries = Vec::new();
        for entry_path in self
            .runtime
            .read_dir(&full)
            .with_context(|| format!("Failed to list {} in mount {}", path, self.uri))?
        {
            let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let kind = if self.runtime.is_dir(&entry_path) {
                MountEntryKind::Directory
            } else {
                MountEntryKind::File
            };
            entries.push(MountEntry {
                name: name.to_string(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn stat(&self, path: &str) -> Option<MountEntryKind> {
        let full = self.resolve(path);
        if self.runtime.is_dir(&full) {
            Some(MountEntryKind::Directory)
        } else if self.runtime.exists(&full) {
            Some(MountEntryKind::File)
        } else {
            None
        }
    }
}

/// Open a mount point for an opaque locator.
///
/// Currently every installed source materializes to a directory, so a
/// locator is always a directory path.
pub fn open_mount<R: Runtime + 'static>(
    runtime: &Arc<R>,
    uri: &str,
) -> Result<Arc<dyn MountPoint>> {
    Ok(Arc::new(DirectoryMount::new(Arc::clone(runtime), uri)?))
}
