use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::installer::PackageSource;
use crate::provider::SourceEntry;
use crate::runtime::Runtime;

/// Uninstall template packs by identifier or display name.
#[tracing::instrument(skip(runtime, identifiers, root))]
pub async fn uninstall<R: Runtime + 'static>(
    runtime: R,
    identifiers: Vec<String>,
    root: Option<PathBuf>,
) -> Result<()> {
    let workspace = super::open_workspace(runtime, root)?;
    let cancel = super::cancel_on_ctrl_c();

    let installed = workspace.provider.list_sources();
    let mut failures = 0;
    let mut targets: Vec<PackageSource> = Vec::new();
    for identifier in &identifiers {
        match find_source(&installed, identifier) {
            Some(source) => targets.push(source.clone()),
            None => {
                eprintln!("error: {} is not installed", identifier);
                failures += 1;
            }
        }
    }

    let total = identifiers.len();
    let results = workspace.provider.uninstall(targets, &cancel).await;
    for result in &results {
        match &result.error {
            None => println!("uninstalled {}", result.source.display_name),
            Some(error) => {
                eprintln!("error: {}: {}", result.source.identifier, error.message);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} uninstall request(s) failed", failures, total);
    }
    Ok(())
}

/// Match an argument against installed sources by identifier first, then
/// by display name. Unsupported sources cannot be uninstalled and are
/// never matched.
fn find_source<'a>(installed: &'a [SourceEntry], argument: &str) -> Option<&'a PackageSource> {
    installed
        .iter()
        .filter_map(SourceEntry::as_managed)
        .find(|source| source.identifier == argument)
        .or_else(|| {
            installed
                .iter()
                .filter_map(SourceEntry::as_managed)
                .find(|source| source.display_name == argument)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(identifier: &str, display_name: &str) -> SourceEntry {
        SourceEntry::Managed(PackageSource {
            installer_id: "folder".to_string(),
            identifier: identifier.to_string(),
            version: "1.0".to_string(),
            mount_uri: identifier.to_string(),
            display_name: display_name.to_string(),
            last_change_time: 0,
            details: BTreeMap::new(),
        })
    }

    #[test]
    fn test_find_source_prefers_identifier() {
        let installed = vec![entry("/packs/a", "b"), entry("/packs/b", "a")];
        let found = find_source(&installed, "/packs/b").unwrap();
        assert_eq!(found.display_name, "a");
    }

    #[test]
    fn test_find_source_falls_back_to_display_name() {
        let installed = vec![entry("/packs/console", "console")];
        assert!(find_source(&installed, "console").is_some());
        assert!(find_source(&installed, "missing").is_none());
    }
}
