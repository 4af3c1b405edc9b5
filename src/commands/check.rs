use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::installer::UpdateCheckStatus;
use crate::runtime::Runtime;

use super::update::select_targets;

/// Report which installed packs have updates available, without applying
/// anything.
#[tracing::instrument(skip(runtime, identifiers, root))]
pub async fn check<R: Runtime + 'static>(
    runtime: R,
    identifiers: Vec<String>,
    root: Option<PathBuf>,
) -> Result<()> {
    let workspace = super::open_workspace(runtime, root)?;
    let cancel = super::cancel_on_ctrl_c();

    let targets = select_targets(workspace.provider.list_sources(), &identifiers)?;
    if targets.is_empty() {
        println!("No packs installed.");
        return Ok(());
    }

    let checks = workspace.provider.check_for_updates(targets, &cancel).await;

    let mut failures = 0;
    for check in &checks {
        match &check.status {
            UpdateCheckStatus::UpToDate => {
                println!(
                    "{} {} is up to date",
                    check.source.display_name, check.source.version
                );
            }
            UpdateCheckStatus::UpdateAvailable(latest) => {
                println!(
                    "{} {} -> {}",
                    check.source.display_name, check.source.version, latest
                );
            }
            UpdateCheckStatus::CheckFailed(reason) => {
                eprintln!("error: could not check {}: {}", check.source.display_name, reason);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} update check(s) failed", failures, checks.len());
    }
    Ok(())
}
