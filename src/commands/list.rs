use std::path::PathBuf;

use anyhow::Result;
use log::debug;

use crate::provider::SourceEntry;
use crate::runtime::Runtime;

/// List all installed template-pack sources.
#[tracing::instrument(skip(runtime, root))]
pub async fn list<R: Runtime + 'static>(runtime: R, root: Option<PathBuf>) -> Result<()> {
    let workspace = super::open_workspace(runtime, root)?;

    let sources = workspace.provider.list_sources();
    if sources.is_empty() {
        println!("No packs installed.");
        return Ok(());
    }

    debug!("Found {} installed source(s)", sources.len());
    for entry in &sources {
        match entry {
            SourceEntry::Managed(source) => {
                println!(
                    "{} {} ({})",
                    source.display_name, source.version, source.installer_id
                );
            }
            SourceEntry::Unsupported(record) => {
                println!(
                    "{} {} (installer '{}' unavailable)",
                    record.display_name, record.version, record.installer_id
                );
            }
        }
    }
    Ok(())
}
