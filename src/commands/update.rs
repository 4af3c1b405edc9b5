use std::path::PathBuf;

use anyhow::{Result, bail};
use log::debug;

use crate::installer::{PackageSource, UpdateCheckStatus, UpdateRequest};
use crate::provider::SourceEntry;
use crate::runtime::Runtime;

/// Update installed template packs.
///
/// With an explicit `--version` the named packs are updated to exactly
/// that version. Without one, each targeted pack is checked against its
/// backend and updated only when a newer version is available. No
/// identifiers means every managed pack.
#[tracing::instrument(skip(runtime, identifiers, version, root))]
pub async fn update<R: Runtime + 'static>(
    runtime: R,
    identifiers: Vec<String>,
    version: Option<String>,
    root: Option<PathBuf>,
) -> Result<()> {
    let workspace = super::open_workspace(runtime, root)?;
    let cancel = super::cancel_on_ctrl_c();

    let targets = select_targets(workspace.provider.list_sources(), &identifiers)?;

    let requests: Vec<UpdateRequest> = if let Some(version) = version {
        targets
            .into_iter()
            .map(|source| UpdateRequest {
                source,
                version: version.clone(),
            })
            .collect()
    } else {
        let checks = workspace.provider.check_for_updates(targets, &cancel).await;
        let mut requests = Vec::new();
        for check in checks {
            match check.status {
                UpdateCheckStatus::UpdateAvailable(latest) => requests.push(UpdateRequest {
                    source: check.source,
                    version: latest,
                }),
                UpdateCheckStatus::UpToDate => {
                    println!(
                        "{} {} is up to date",
                        check.source.display_name, check.source.version
                    );
                }
                UpdateCheckStatus::CheckFailed(reason) => {
                    eprintln!(
                        "error: could not check {}: {}",
                        check.source.display_name, reason
                    );
                }
            }
        }
        requests
    };

    if requests.is_empty() {
        debug!("Nothing to update");
        return Ok(());
    }

    let total = requests.len();
    let results = workspace.provider.update(requests, &cancel).await;

    let mut failures = 0;
    for result in &results {
        match (&result.source, &result.error) {
            (Some(source), _) => {
                println!("updated {} to {}", source.display_name, source.version);
            }
            (None, Some(error)) => {
                eprintln!(
                    "error: {}: {}",
                    result.request.source.identifier, error.message
                );
                failures += 1;
            }
            (None, None) => unreachable!("update result without source or error"),
        }
    }

    if failures > 0 {
        bail!("{} of {} update request(s) failed", failures, total);
    }
    Ok(())
}

/// Pick the managed sources named by `identifiers`, or all of them when
/// none are given. Naming an unknown or unsupported pack is an error.
pub(super) fn select_targets(
    installed: Vec<SourceEntry>,
    identifiers: &[String],
) -> Result<Vec<PackageSource>> {
    let managed: Vec<PackageSource> = installed
        .iter()
        .filter_map(SourceEntry::as_managed)
        .cloned()
        .collect();

    if identifiers.is_empty() {
        return Ok(managed);
    }

    let mut targets = Vec::new();
    for identifier in identifiers {
        let found = managed
            .iter()
            .find(|source| {
                source.identifier == *identifier || source.display_name == *identifier
            })
            .cloned();
        match found {
            Some(source) => targets.push(source),
            None => bail!("{} is not installed", identifier),
        }
    }
    Ok(targets)
}
