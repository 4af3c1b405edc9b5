use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Result, bail};
use log::debug;

use crate::installer::{InstallRequest, InstallerErrorCode};
use crate::runtime::Runtime;

/// Install one or more template packs, concurrently.
#[tracing::instrument(skip(runtime, identifiers, version, root))]
pub async fn install<R: Runtime + 'static>(
    runtime: R,
    identifiers: Vec<String>,
    version: Option<String>,
    root: Option<PathBuf>,
) -> Result<()> {
    let workspace = super::open_workspace(runtime, root)?;
    let cancel = super::cancel_on_ctrl_c();

    let requests: Vec<InstallRequest> = identifiers
        .into_iter()
        .map(|identifier| InstallRequest {
            identifier,
            version: version.clone(),
            details: BTreeMap::new(),
        })
        .collect();
    debug!("Installing {} pack(s)", requests.len());

    let results = workspace.provider.install(requests, &cancel).await;

    let mut failures = 0;
    for result in &results {
        match (&result.source, &result.error) {
            (Some(source), _) => {
                println!("installed {} {}", source.display_name, source.version);
            }
            (None, Some(error)) if error.code == InstallerErrorCode::AlreadyInstalled => {
                println!("{}", error.message);
            }
            (None, Some(error)) => {
                eprintln!("error: {}: {}", result.request, error.message);
                failures += 1;
            }
            (None, None) => unreachable!("install result without source or error"),
        }
    }

    if failures > 0 {
        bail!("{} of {} install request(s) failed", failures, results.len());
    }
    Ok(())
}
