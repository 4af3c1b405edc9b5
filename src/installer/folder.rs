//! Installer backend for template packs that live in a local directory.
//!
//! The directory is mounted in place; nothing is copied into the managed
//! packages folder, and uninstalling only drops the record. The version
//! of a folder pack, when not requested explicitly, is derived from the
//! directory's modification time.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::cache::PackageRecord;
use crate::runtime::Runtime;

use super::{
    InstallRequest, InstallResult, Installer, InstallerErrorCode, PackageSource, UninstallResult,
    UpdateCheckResult, UpdateCheckStatus, UpdateRequest, UpdateResult, unix_seconds,
};

pub const FOLDER_INSTALLER_ID: &str = "folder";

pub struct FolderInstaller<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> FolderInstaller<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    fn folder_version(&self, path: &Path) -> Result<u64> {
        Ok(unix_seconds(self.runtime.modified(path)?))
    }
}

#[async_trait]
impl<R: Runtime + 'static> Installer for FolderInstaller<R> {
    fn id(&self) -> &str {
        FOLDER_INSTALLER_ID
    }

    async fn can_install(&self, request: &InstallRequest, _cancel: &CancellationToken) -> bool {
        self.runtime.is_dir(Path::new(&request.identifier))
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
        let mount_uri = match self.runtime.canonicalize(path) {
            Ok(canonical) => canonical.to_string_lossy().into_owned(),
            Err(e) => {
                return InstallResult::failure(
                    request.clone(),
                    InstallerErrorCode::InstallFailed,
                    format!("{} is not an installable folder: {}", request.identifier, e),
                );
            }
        };

        let changed = match self.folder_version(path) {
            Ok(seconds) => seconds,
            Err(e) => {
                return InstallResult::failure(
                    request.clone(),
                    InstallerErrorCode::InstallFailed,
                    format!("Failed to read {}: {}", request.identifier, e),
                );
            }
        };

        let version = request
            .version
            .clone()
            .unwrap_or_else(|| changed.to_string());
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.identifier.clone());

        debug!("Installed folder pack {} at {}", display_name, mount_uri);
        InstallResult::success(
            request.clone(),
            PackageSource {
                installer_id: FOLDER_INSTALLER_ID.to_string(),
                identifier: request.identifier.clone(),
                version,
                mount_uri,
                display_name,
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
        // The directory is not owned by the installer; dropping the
        // record is all there is to do.
        debug!("Uninstalled folder pack {}", source.display_name);
        UninstallResult::success(source.clone())
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
                let status = match self.folder_version(Path::new(&source.mount_uri)) {
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
        if record.installer_id != FOLDER_INSTALLER_ID {
            bail!(
                "Record for installer '{}' cannot be read by the folder installer",
                record.installer_id
            );
        }
        Ok(PackageSource::from_record(record))
    }
}
