//! Command layer - thin orchestration between the CLI surface and the
//! provider, catalog and resolution engine.

mod check;
mod install;
mod list;
mod paths;
mod resolve;
mod uninstall;
mod update;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveExtractorImpl;
use crate::cache::PackageCache;
use crate::installer::{ArchivePackInstaller, FolderInstaller, Installer};
use crate::provider::SourceProvider;
use crate::runtime::Runtime;

pub use check::check;
pub use install::install;
pub use list::list;
pub use paths::default_root;
pub use resolve::{ResolveOptions, parse_parameter, resolve};
pub use uninstall::uninstall;
pub use update::update;

/// Everything a command needs: the runtime, the resolved root directory,
/// the shared cache and the provider wired over the default installers.
pub(crate) struct Workspace<R: Runtime> {
    pub runtime: Arc<R>,
    pub provider: Arc<SourceProvider<R>>,
}

/// Open the workspace rooted at `root` (or the default root), loading the
/// persisted cache and registering the folder and archive installers, in
/// that order.
pub(crate) fn open_workspace<R: Runtime + 'static>(
    runtime: R,
    root: Option<PathBuf>,
) -> Result<Workspace<R>> {
    let runtime = Arc::new(runtime);
    let root = match root {
        Some(path) => path,
        None => paths::default_root(runtime.as_ref())?,
    };
    debug!("Using root: {}", root.display());
    runtime.create_dir_all(&root)?;

    let cache = PackageCache::open(Arc::clone(&runtime), root.join("installed.json"))?;

    let installers: Vec<Arc<dyn Installer>> = vec![
        Arc::new(FolderInstaller::new(Arc::clone(&runtime))),
        Arc::new(ArchivePackInstaller::new(
            Arc::clone(&runtime),
            ArchiveExtractorImpl::new(),
            root.join("packages"),
        )),
    ];
    let provider = SourceProvider::new(installers, cache);

    Ok(Workspace { runtime, provider })
}

/// Cancellation token cancelled on Ctrl-C, so in-flight installer calls
/// abort with a `Cancelled` outcome instead of leaving partial state.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    token
}
