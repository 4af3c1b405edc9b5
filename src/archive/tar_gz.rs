use crate::runtime::Runtime;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::debug;
use std::path::Path;
use tar::Archive;

use super::ArchiveExtractor;

/// Extractor for .tar.gz / .tgz archives
pub struct TarGzExtractor;

impl ArchiveExtractor for TarGzExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".tar.gz") || name.ends_with(".tgz")
    }

    fn extract<R: Runtime + 'static>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        debug!("Extracting tar.gz archive to {:?}...", extract_to);
        let file = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

        let decoder = GzDecoder::new(file);
        let mut archive = Archive::new(decoder);

        for entry in archive
            .entries()
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?
        {
            let mut entry = entry.context("Failed to read archive entry")?;
            let entry_path = entry
                .path()
                .context("Failed to read entry path")?
                .to_path_buf();

            // Reject entries that would escape the target directory
            let Some(safe_path) = sanitize_entry_path(&entry_path) else {
                debug!("Skipping entry with invalid path: {:?}", entry_path);
                continue;
            };

            let full_path = extract_to.join(&safe_path);

            if entry.header().entry_type().is_dir() {
                runtime.create_dir_all(&full_path)?;
            } else {
                if let Some(parent) = full_path.parent() {
                    runtime.create_dir_all(parent)?;
                }
                let mut dest_file = runtime.create_file(&full_path)?;
                std::io::copy(&mut entry, &mut dest_file)
                    .with_context(|| format!("Failed to extract file {:?}", full_path))?;

                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode()
                    && let Err(e) = runtime.set_permissions(&full_path, mode)
                {
                    debug!("Failed to set permissions on {:?}: {}", full_path, e);
                }
            }
        }

        Ok(())
    }
}

/// Strip leading separators and reject `..` components.
fn sanitize_entry_path(path: &Path) -> Option<std::path::PathBuf> {
    use std::path::Component;

    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
