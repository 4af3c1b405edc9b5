//! Installer backend for template packs distributed as local archives.
//!
//! The archive is extracted into the managed packages folder, one
//! directory per pack and version; the mount locator points at the
//! extracted directory. A failed or cancelled extraction removes the
//! partially-written directory before reporting, so the persisted state
//! never references half-extracted content.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveExtractor;
use crate::cache::PackageRecord;
use crate::runtime::Runtime;

use super::{
    InstallRequest, InstallResult, Installer, InstallerErrorCode, PackageSource, UninstallResult,
    UpdateCheckResult, UpdateCheckStatus, UpdateRequest, UpdateResult, unix_seconds,
};

pub const ARCHIVE_INSTALLER_ID: &str = "archive";

pub struct ArchivePackInstaller<R: Runtime, E: ArchiveExtractor> {
    runtime: Arc<R>,
    extractor: E,
    packages_dir: PathBuf,
}

impl<R: Runtime + 'static, E: ArchiveExtractor> ArchivePackInstaller<R, E> {
    pub fn new(runtime: Arc<R>, extractor: E, packages_dir: PathBuf) -> Self {
        Self {
            runtime,
            extractor,
            packages_dir,
        }
    }

    fn archive_version(&self, path: &Path) -> Result<u64> {
        Ok(unix_seconds(self.runtime.modified(path)?))
    }

    fn extract_to(&self, stem: &str, version: &str) -> PathBuf {
        self.packages_dir.join(stem).join(version)
    }

    /// Remove a version directory, then its pack directory if that left
    /// it empty.
    fn remove_version_dir(&self, target: &Path) -> Result<()> {
        if self.runtime.exists(target) {
            self.runtime.remove_dir_all(target)?;
        }
        if let Some(pack_dir) = target.parent()
            && self.runtime.exists(pack_dir)
            && let Ok(entries) = self.runtime.read_dir(pack_dir)
            && entries.is_empty()
        {
            let _ = self.runtime.remove_dir(pack_dir);
        }
        Ok(())
    }
}

/// Pack name for an archive file: the file name with its archive
/// extension stripped.
fn pack_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_lowercase();
    for suffix in [".tar.gz", ".tgz", ".zip"] {
        if lower.ends_with(suffix) {
            return name[..name.len() - suffix.len()].to_string();
        }
    }
    name
}

#[async_trait]
impl<R, E> Installer for ArchivePackInstaller<R, E>
where
    R: Runtime + 'static,
    E: ArchiveExtractor + 'static,
{
    fn id(&self) -> &str {
        ARCHIVE_INSTALLER_ID
    }

    async fn can_install(&self, request: &InstallRequest, _cancel: &CancellationToken) -> bool {
        let path = Path::new(&request.identifier);
        self.extractor.can_handle(path) && self.runtime.is_file(path)
    }

    #[tracing::instrument(skip(self, request, cancel))]
    async fn install(
        &self,
        request: &InstallRequest,
        cancel: &CancellationToken,
    ) -> InstallResult {
        if cancel.is_cancelled() {
            return InstallResult::failure(
                request.clone(),
                InstallerErrorCode::Cancelled,
                format!("Installation of {} was cancelled", request),
            );
        }

        let path = Path::new(&request.identifier);
        let changed = match self.archive_version(path) {
            Ok(seconds) => seconds,
            Err(e) => {
                return InstallResult::failure(
                    request.clone(),
                    InstallerErrorCode::InstallFailed,
                    format!("Failed to read archive {}: {}", request.identifier, e),
                );
            }
        };

        let stem = pack_stem(path);
        let version = request
            .version
            .clone()
            .unwrap_or_else(|| changed.to_string());
        let target = self.extract_to(&stem, &version);

        // A leftover directory from an interrupted run is stale; replace it.
        if self.runtime.exists(&target)
            && let Err(e) = self.runtime.remove_dir_all(&target)
        {
            return InstallResult::failure(
                request.clone(),
                InstallerErrorCode::InstallFailed,
                format!("Failed to clear {}: {}", target.display(), e),
            );
        }
        if let Err(e) = self.runtime.create_dir_all(&target) {
            return InstallResult::failure(
                request.clone(),
                InstallerErrorCode::InstallFailed,
                format!("Failed to create {}: {}", target.display(), e),
            );
        }

        debug!("Extracting {} to {:?}", request.identifier, target);
        if let Err(e) = self.extractor.extract(self.runtime.as_ref(), path, &target) {
            if let Err(cleanup) = self.remove_version_dir(&target) {
                warn!("Failed to clean up {}: {}", target.display(), cleanup);
            }
            return InstallResult::failure(
                request.clone(),
                InstallerErrorCode::InstallFailed,
                format!("Failed to extract {}: {}", request.identifier, e),
            );
        }

        if cancel.is_cancelled() {
            if let Err(cleanup) = self.remove_version_dir(&target) {
                warn!("Failed to clean up {}: {}", target.display(), cleanup);
            }
            return InstallResult::failure(
                request.clone(),
                InstallerErrorCode::Cancelled,
                format!("Installation of {} was cancelled", request),
            );
        }

        InstallResult::success(
            request.clone(),
            PackageSource {
                installer_id: ARCHIVE_INSTALLER_ID.to_string(),
                identifier: request.identifier.clone(),
                version,
                mount_uri: target.to_string_lossy().into_owned(),
                display_name: stem,
                last_change_time: changed,
                details: request.details.clone(),
            },
        )
    }

    async fn uninstall(
        &self,
        source: &PackageSource,
        _cancel: &CancellationToken,
    ) -> UninstallResult {
        match self.remove_version_dir(Path::new(&source.mount_uri)) {
            Ok(()) => {
                debug!("Uninstalled archive pack {}", source.display_name);
                UninstallResult::success(source.clone())
            }
            Err(e) => UninstallResult::failure(
                source.clone(),
                InstallerErrorCode::UninstallFailed,
                format!("Failed to remove {}: {}", source.mount_uri, e),
            ),
        }
    }

    async fn update(&self, request: &UpdateRequest, cancel: &CancellationToken) -> UpdateResult {
        let install_request = InstallRequest {
            identifier: request.source.identifier.clone(),
            version: Some(request.version.clone()),
            details: request.source.details.clone(),
        };
        let result = self.install(&install_request, cancel).await;
        match (result.source, result.error) {
            (Some(source), None) => UpdateResult::success(request.clone(), source),
            (_, Some(error)) => UpdateResult::failure(
                request.clone(),
                InstallerErrorCode::UpdateFailed,
                error.message,
            ),
            (None, None) => unreachable!("install result without source or error"),
        }
    }

    async fn latest_versions(
        &self,
        sources: &[PackageSource],
        _cancel: &CancellationToken,
    ) -> Vec<UpdateCheckResult> {
        sources
            .iter()
            .map(|source| {
                let status = match self.archive_version(Path::new(&source.identifier)) {
                    Ok(changed) if changed != source.last_change_time => {
                        UpdateCheckStatus::UpdateAvailable(changed.to_string())
                    }
                    Ok(_) => UpdateCheckStatus::UpToDate,
                    Err(e) => UpdateCheckStatus::CheckFailed(e.to_string()),
                };
                UpdateCheckResult {
                    source: source.clone(),
                    status,
                }
            })
            .collect()
    }

    fn serialize(&self, source: &PackageSource) -> PackageRecord {
        source.to_record()
    }

    fn deserialize(&self, record: &PackageRecord) -> Result<PackageSource> {
        if record.installer_id != ARCHIVE_INSTALLER_ID {
            bail!(
                "Record for installer '{}' cannot be read by the archive installer",
                record.installer_id
            );
        }
        Ok(PackageSource::from_record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveExtractorImpl;
    use crate::runtime::RealRuntime;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs::File;
    use std::io::Write;
    use tar::Builder;
    use tempfile::tempdir;

    fn write_pack_archive(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let enc = GzEncoder::new(file, Compression::default());
        let mut tar = Builder::new(enc);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_cksum();
            tar.append(&header, content.as_bytes()).unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap().flush().unwrap();
    }

    fn installer(
        packages_dir: &Path,
    ) -> ArchivePackInstaller<RealRuntime, ArchiveExtractorImpl> {
        ArchivePackInstaller::new(
            Arc::new(RealRuntime),
            ArchiveExtractorImpl::new(),
            packages_dir.to_path_buf(),
        )
    }

    #[test]
    fn test_pack_stem() {
        assert_eq!(pack_stem(Path::new("/a/console.tar.gz")), "console");
        assert_eq!(pack_stem(Path::new("web.tgz")), "web");
        assert_eq!(pack_stem(Path::new("Classlib.ZIP")), "Classlib");
        assert_eq!(pack_stem(Path::new("plain")), "plain");
    }

    #[tokio::test]
    async fn test_can_install_requires_archive_file() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pack.tar.gz");
        write_pack_archive(&archive, &[("console/template.json", "{}")]);

        let installer = installer(&dir.path().join("packages"));
        let cancel = CancellationToken::new();

        assert!(
            installer
                .can_install(&InstallRequest::new(archive.to_string_lossy()), &cancel)
                .await
        );
        assert!(
            !installer
                .can_install(
                    &InstallRequest::new(dir.path().to_string_lossy()),
                    &cancel
                )
                .await
        );
        assert!(
            !installer
                .can_install(&InstallRequest::new("/missing/pack.tar.gz"), &cancel)
                .await
        );
    }

    #[tokio::test]
    async fn test_install_extracts_into_packages_dir() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("console.tar.gz");
        write_pack_archive(&archive, &[("console/template.json", "{}")]);

        let packages = dir.path().join("packages");
        let installer = installer(&packages);
        let cancel = CancellationToken::new();
        let request = InstallRequest::with_version(archive.to_string_lossy(), "1.0");

        let result = installer.install(&request, &cancel).await;
        assert!(result.is_success(), "{:?}", result.error);

        let source = result.source.unwrap();
        assert_eq!(source.display_name, "console");
        assert_eq!(source.version, "1.0");
        assert_eq!(
            PathBuf::from(&source.mount_uri),
            packages.join("console").join("1.0")
        );
        assert!(
            packages
                .join("console")
                .join("1.0")
                .join("console/template.json")
                .is_file()
        );
    }

    #[tokio::test]
    async fn test_install_corrupt_archive_leaves_no_directory() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.tar.gz");
        std::fs::write(&archive, b"this is not a gzip stream").unwrap();

        let packages = dir.path().join("packages");
        let installer = installer(&packages);
        let cancel = CancellationToken::new();
        let request = InstallRequest::with_version(archive.to_string_lossy(), "1.0");

        let result = installer.install(&request, &cancel).await;
        assert!(!result.is_success());
        assert_eq!(
            result.error.unwrap().code,
            InstallerErrorCode::InstallFailed
        );
        assert!(!packages.join("broken").exists());
    }

    #[tokio::test]
    async fn test_uninstall_removes_version_and_empty_pack_dir() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("console.tar.gz");
        write_pack_archive(&archive, &[("console/template.json", "{}")]);

        let packages = dir.path().join("packages");
        let installer = installer(&packages);
        let cancel = CancellationToken::new();
        let request = InstallRequest::with_version(archive.to_string_lossy(), "1.0");
        let source = installer.install(&request, &cancel).await.source.unwrap();

        let result = installer.uninstall(&source, &cancel).await;
        assert!(result.is_success());
        assert!(!packages.join("console").exists());
    }

    #[tokio::test]
    async fn test_uninstall_keeps_sibling_versions() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("console.tar.gz");
        write_pack_archive(&archive, &[("console/template.json", "{}")]);

        let packages = dir.path().join("packages");
        let installer = installer(&packages);
        let cancel = CancellationToken::new();

        let v1 = installer
            .install(
                &InstallRequest::with_version(archive.to_string_lossy(), "1.0"),
                &cancel,
            )
            .await
            .source
            .unwrap();
        let _v2 = installer
            .install(
                &InstallRequest::with_version(archive.to_string_lossy(), "2.0"),
                &cancel,
            )
            .await
            .source
            .unwrap();

        let result = installer.uninstall(&v1, &cancel).await;
        assert!(result.is_success());
        assert!(!packages.join("console").join("1.0").exists());
        assert!(packages.join("console").join("2.0").exists());
    }

    #[tokio::test]
    async fn test_update_replaces_extracted_content() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("console.tar.gz");
        write_pack_archive(&archive, &[("console/template.json", "{}")]);

        let packages = dir.path().join("packages");
        let installer = installer(&packages);
        let cancel = CancellationToken::new();
        let source = installer
            .install(
                &InstallRequest::with_version(archive.to_string_lossy(), "1.0"),
                &cancel,
            )
            .await
            .source
            .unwrap();

        let update = UpdateRequest {
            source,
            version: "2.0".to_string(),
        };
        let result = installer.update(&update, &cancel).await;
        assert!(result.is_success());
        assert_eq!(result.source.unwrap().version, "2.0");
        assert!(packages.join("console").join("2.0").exists());
    }

    #[tokio::test]
    async fn test_serialize_deserialize_roundtrip() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("console.tar.gz");
        write_pack_archive(&archive, &[("console/template.json", "{}")]);

        let installer = installer(&dir.path().join("packages"));
        let cancel = CancellationToken::new();
        let source = installer
            .install(
                &InstallRequest::with_version(archive.to_string_lossy(), "1.0"),
                &cancel,
            )
            .await
            .source
            .unwrap();

        let restored = installer
            .deserialize(&installer.serialize(&source))
            .unwrap();
        assert_eq!(restored, source);
    }
}
