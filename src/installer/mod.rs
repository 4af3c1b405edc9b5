//! Installer contract and lifecycle request/result model.
//!
//! An installer is a backend that can install, update, uninstall and
//! version-check template packs of one kind. Backends are selected at
//! runtime by capability probing ([`Installer::can_install`]); each one
//! also serializes its own packages into the persisted cache's record
//! format.
//!
//! Backend failures are carried as result values with an
//! [`InstallerErrorCode`], never as errors that would abort sibling
//! requests.

mod archive;
mod folder;

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::PackageRecord;

pub use archive::{ARCHIVE_INSTALLER_ID, ArchivePackInstaller};
pub use folder::{FOLDER_INSTALLER_ID, FolderInstaller};

/// An installed template-pack source.
///
/// `installer_id` records which backend owns the package; it is
/// provenance metadata, not part of the pack's content identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSource {
    pub installer_id: String,
    pub identifier: String,
    pub version: String,
    pub mount_uri: String,
    pub display_name: String,
    pub last_change_time: u64,
    pub details: BTreeMap<String, String>,
}

impl PackageSource {
    pub fn to_record(&self) -> PackageRecord {
        PackageRecord {
            installer_id: self.installer_id.clone(),
            identifier: self.identifier.clone(),
            version: self.version.clone(),
            mount_uri: self.mount_uri.clone(),
            display_name: self.display_name.clone(),
            last_change_time: self.last_change_time,
            details: self.details.clone(),
        }
    }

    pub fn from_record(record: &PackageRecord) -> Self {
        Self {
            installer_id: record.installer_id.clone(),
            identifier: record.identifier.clone(),
            version: record.version.clone(),
            mount_uri: record.mount_uri.clone(),
            display_name: record.display_name.clone(),
            last_change_time: record.last_change_time,
            details: record.details.clone(),
        }
    }
}

/// Request to install a package, by identifier and optional version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallRequest {
    pub identifier: String,
    pub version: Option<String>,
    pub details: BTreeMap<String, String>,
}

impl InstallRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_version(identifier: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            version: Some(version.into()),
            details: BTreeMap::new(),
        }
    }
}

impl fmt::Display for InstallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.identifier, version),
            None => write!(f, "{}", self.identifier),
        }
    }
}

/// Request to update an installed package to a specific version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub source: PackageSource,
    pub version: String,
}

/// Enumerated lifecycle outcome codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerErrorCode {
    /// No registered installer accepts the request.
    UnsupportedRequest,
    /// The same identifier and version is already installed; a no-op
    /// signal, not a failure.
    AlreadyInstalled,
    /// The teardown of a previous version failed; the previous record
    /// remains authoritative.
    UpdateUninstallFailed,
    InstallFailed,
    UninstallFailed,
    UpdateFailed,
    /// The operation referenced an identifier with no matching installed
    /// record or registered installer.
    NotFound,
    Cancelled,
}

impl fmt::Display for InstallerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UnsupportedRequest => "unsupported request",
            Self::AlreadyInstalled => "already installed",
            Self::UpdateUninstallFailed => "uninstall of previous version failed",
            Self::InstallFailed => "install failed",
            Self::UninstallFailed => "uninstall failed",
            Self::UpdateFailed => "update failed",
            Self::NotFound => "not found",
            Self::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Code plus human-readable message for a failed (or no-op) operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    pub code: InstallerErrorCode,
    pub message: String,
}

/// Outcome of an install request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub request: InstallRequest,
    pub source: Option<PackageSource>,
    pub error: Option<OperationError>,
}

impl InstallResult {
    pub fn success(request: InstallRequest, source: PackageSource) -> Self {
        Self {
            request,
            source: Some(source),
            error: None,
        }
    }

    pub fn failure(
        request: InstallRequest,
        code: InstallerErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request,
            source: None,
            error: Some(OperationError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of an uninstall request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallResult {
    pub source: PackageSource,
    pub error: Option<OperationError>,
}

impl UninstallResult {
    pub fn success(source: PackageSource) -> Self {
        Self {
            source,
            error: None,
        }
    }

    pub fn failure(
        source: PackageSource,
        code: InstallerErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            error: Some(OperationError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of an update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub request: UpdateRequest,
    pub source: Option<PackageSource>,
    pub error: Option<OperationError>,
}

impl UpdateResult {
    pub fn success(request: UpdateRequest, source: PackageSource) -> Self {
        Self {
            request,
            source: Some(source),
            error: None,
        }
    }

    pub fn failure(
        request: UpdateRequest,
        code: InstallerErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request,
            source: None,
            error: Some(OperationError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-source outcome of a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheckStatus {
    UpToDate,
    UpdateAvailable(String),
    CheckFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheckResult {
    pub source: PackageSource,
    pub status: UpdateCheckStatus,
}

/// Backend capable of install/update/uninstall/version-check for packages
/// of one kind.
///
/// `deserialize(serialize(source))` must reproduce an equivalent
/// [`PackageSource`] for the same installer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Installer: Send + Sync {
    /// Stable identifier, unique among registered installers; recorded on
    /// every package this backend installs.
    fn id(&self) -> &str;

    /// Capability probe. Must be side-effect-free and fast.
    async fn can_install(&self, request: &InstallRequest, cancel: &CancellationToken) -> bool;

    async fn install(&self, request: &InstallRequest, cancel: &CancellationToken)
    -> InstallResult;

    async fn uninstall(
        &self,
        source: &PackageSource,
        cancel: &CancellationToken,
    ) -> UninstallResult;

    async fn update(&self, request: &UpdateRequest, cancel: &CancellationToken) -> UpdateResult;

    /// Check the latest available version for each source in one batched
    /// call. Implementations report per-source outcomes and never fail
    /// the batch as a whole.
    async fn latest_versions(
        &self,
        sources: &[PackageSource],
        cancel: &CancellationToken,
    ) -> Vec<UpdateCheckResult>;

    fn serialize(&self, source: &PackageSource) -> PackageRecord;

    fn deserialize(&self, record: &PackageRecord) -> Result<PackageSource>;
}

/// Unix seconds for a timestamp, saturating at zero for pre-epoch times.
pub(crate) fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_source() -> PackageSource {
        PackageSource {
            installer_id: "folder".to_string(),
            identifier: "/packs/console".to_string(),
            version: "1.0".to_string(),
            mount_uri: "/packs/console".to_string(),
            display_name: "console".to_string(),
            last_change_time: 1_700_000_000,
            details: BTreeMap::new(),
        }
    }

    #[test]
    fn test_source_record_roundtrip() {
        let source = sample_source();
        assert_eq!(PackageSource::from_record(&source.to_record()), source);
    }

    #[test]
    fn test_install_request_display() {
        assert_eq!(InstallRequest::new("pkgA").to_string(), "pkgA");
        assert_eq!(
            InstallRequest::with_version("pkgA", "2.0").to_string(),
            "pkgA@2.0"
        );
    }

    #[test]
    fn test_result_helpers() {
        let request = InstallRequest::new("pkgA");
        let ok = InstallResult::success(request.clone(), sample_source());
        assert!(ok.is_success());
        assert!(ok.source.is_some());

        let failed = InstallResult::failure(
            request,
            InstallerErrorCode::InstallFailed,
            "backend exploded",
        );
        assert!(!failed.is_success());
        assert_eq!(
            failed.error.as_ref().unwrap().code,
            InstallerErrorCode::InstallFailed
        );
    }
}
