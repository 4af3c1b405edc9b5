//! Source provider - reconciles the persisted package cache against the
//! registered installer backends and orchestrates lifecycle operations.
//!
//! The provider owns the in-memory view of installed sources, rebuilt
//! wholesale from the cache on construction and on every
//! externally-signalled cache change. Lifecycle requests are routed to
//! the owning installer; bulk requests fan out concurrently and are
//! joined before returning, with results positionally matching the
//! input. One request's failure never aborts its siblings.
//!
//! Concurrent operations against the *same* identifier are not
//! serialized here; callers must not submit them, or the loser's
//! prerequisite check will be stale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures_util::future::join_all;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheSubscription, PackageCache, PackageRecord};
use crate::installer::{
    InstallRequest, InstallResult, Installer, InstallerErrorCode, PackageSource, UninstallResult,
    UpdateCheckResult, UpdateCheckStatus, UpdateRequest, UpdateResult,
};
use crate::runtime::Runtime;

/// An enumerable installed source: either managed by a registered
/// installer, or a durable record whose installer is unavailable.
///
/// Unsupported sources stay enumerable (their content may still be
/// mounted) but lifecycle operations against them fail with
/// [`InstallerErrorCode::NotFound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEntry {
    Managed(PackageSource),
    Unsupported(PackageRecord),
}

impl SourceEntry {
    pub fn installer_id(&self) -> &str {
        match self {
            Self::Managed(source) => &source.installer_id,
            Self::Unsupported(record) => &record.installer_id,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Managed(source) => &source.identifier,
            Self::Unsupported(record) => &record.identifier,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::Managed(source) => &source.version,
            Self::Unsupported(record) => &record.version,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Managed(source) => &source.display_name,
            Self::Unsupported(record) => &record.display_name,
        }
    }

    pub fn mount_uri(&self) -> &str {
        match self {
            Self::Managed(source) => &source.mount_uri,
            Self::Unsupported(record) => &record.mount_uri,
        }
    }

    pub fn as_managed(&self) -> Option<&PackageSource> {
        match self {
            Self::Managed(source) => Some(source),
            Self::Unsupported(_) => None,
        }
    }
}

#[derive(Default)]
struct ProviderState {
    /// installer id -> identifier -> source
    sources: HashMap<String, HashMap<String, PackageSource>>,
    unsupported: Vec<PackageRecord>,
}

type SourcesChangedListener = Box<dyn Fn() + Send + Sync>;

/// Orchestrator over the registered installers and the persisted cache.
pub struct SourceProvider<R: Runtime> {
    /// Registration order decides which capable installer wins a probe.
    installers: Vec<Arc<dyn Installer>>,
    installers_by_id: HashMap<String, Arc<dyn Installer>>,
    cache: Arc<PackageCache<R>>,
    state: Mutex<ProviderState>,
    listeners: Mutex<Vec<SourcesChangedListener>>,
    cache_subscription: Mutex<Option<CacheSubscription>>,
}

impl<R: Runtime + 'static> SourceProvider<R> {
    /// Build a provider over the given installers (in registration order)
    /// and cache, reconcile once, and subscribe to external cache
    /// changes. The subscription is released with the provider.
    pub fn new(installers: Vec<Arc<dyn Installer>>, cache: Arc<PackageCache<R>>) -> Arc<Self> {
        let mut installers_by_id = HashMap::new();
        for installer in &installers {
            if installers_by_id
                .insert(installer.id().to_string(), Arc::clone(installer))
                .is_some()
            {
                warn!("Duplicate installer id '{}' registered", installer.id());
            }
        }

        let provider = Arc::new(Self {
            installers,
            installers_by_id,
            cache: Arc::clone(&cache),
            state: Mutex::new(ProviderState::default()),
            listeners: Mutex::new(Vec::new()),
            cache_subscription: Mutex::new(None),
        });

        provider.reload_cache();

        let weak: Weak<Self> = Arc::downgrade(&provider);
        let subscription = cache.subscribe(move || {
            if let Some(provider) = weak.upgrade() {
                provider.reload_cache();
            }
        });
        *provider
            .cache_subscription
            .lock()
            .expect("provider subscription poisoned") = Some(subscription);

        provider
    }

    /// Register a callback fired after every change to the set of
    /// installed sources (reconciliation or successful lifecycle
    /// mutation). Listeners live as long as the provider.
    pub fn on_sources_changed(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("provider listeners poisoned")
            .push(Box::new(listener));
    }

    /// Reconciled snapshot of all installed sources. No I/O; order is
    /// installer registration order, identifiers sorted within each
    /// installer, unsupported records last.
    pub fn list_sources(&self) -> Vec<SourceEntry> {
        let state = self.state.lock().expect("provider state poisoned");
        let mut entries = Vec::new();
        for installer in &self.installers {
            if let Some(sources) = state.sources.get(installer.id()) {
                let mut sorted: Vec<_> = sources.values().cloned().collect();
                sorted.sort_by(|a, b| a.identifier.cmp(&b.identifier));
                entries.extend(sorted.into_iter().map(SourceEntry::Managed));
            }
        }
        entries.extend(
            state
                .unsupported
                .iter()
                .cloned()
                .map(SourceEntry::Unsupported),
        );
        entries
    }

    /// Rebuild the in-memory index wholesale from the cache's current
    /// records. Records owned by an unregistered installer, or that the
    /// owning installer fails to deserialize, degrade to unsupported
    /// sources.
    #[tracing::instrument(skip(self))]
    pub fn reload_cache(&self) {
        let records = self.cache.records();
        let mut next = ProviderState::default();
        for installer in &self.installers {
            next.sources.insert(installer.id().to_string(), HashMap::new());
        }

        for record in records {
            let Some(installer) = self.installers_by_id.get(&record.installer_id) else {
                next.unsupported.push(record);
                continue;
            };
            match installer.deserialize(&record) {
                Ok(source) => {
                    next.sources
                        .entry(record.installer_id.clone())
                        .or_default()
                        .insert(source.identifier.clone(), source);
                }
                Err(e) => {
                    warn!(
                        "Failed to deserialize record {} for installer '{}': {}",
                        record.identifier, record.installer_id, e
                    );
                    next.unsupported.push(record);
                }
            }
        }

        *self.state.lock().expect("provider state poisoned") = next;
        self.notify_sources_changed();
    }

    /// Ask each owning installer for the latest versions available, one
    /// batched call per installer, run concurrently. Results are
    /// reordered to match the input source order.
    #[tracing::instrument(skip(self, sources, cancel))]
    pub async fn check_for_updates(
        &self,
        sources: Vec<PackageSource>,
        cancel: &CancellationToken,
    ) -> Vec<UpdateCheckResult> {
        let mut batches: Vec<(Arc<dyn Installer>, Vec<PackageSource>)> = Vec::new();
        let mut unregistered = Vec::new();
        for source in &sources {
            match self.installers_by_id.get(&source.installer_id) {
                Some(installer) => {
                    match batches
                        .iter_mut()
                        .find(|(batch_installer, _)| batch_installer.id() == installer.id())
                    {
                        Some((_, batch)) => batch.push(source.clone()),
                        None => batches.push((Arc::clone(installer), vec![source.clone()])),
                    }
                }
                None => unregistered.push(source.clone()),
            }
        }

        let batch_results = join_all(batches.iter().map(|(installer, batch)| async {
            installer.latest_versions(batch, cancel).await
        }))
        .await;

        let mut by_key: HashMap<(String, String), Vec<UpdateCheckResult>> = HashMap::new();
        for result in batch_results.into_iter().flatten() {
            by_key
                .entry((
                    result.source.installer_id.clone(),
                    result.source.identifier.clone(),
                ))
                .or_default()
                .push(result);
        }
        for source in unregistered {
            let status = UpdateCheckStatus::CheckFailed(format!(
                "Installer '{}' is not registered",
                source.installer_id
            ));
            by_key
                .entry((source.installer_id.clone(), source.identifier.clone()))
                .or_default()
                .push(UpdateCheckResult { source, status });
        }

        sources
            .into_iter()
            .map(|source| {
                let key = (source.installer_id.clone(), source.identifier.clone());
                match by_key.get_mut(&key).and_then(|results| {
                    if results.is_empty() {
                        None
                    } else {
                        Some(results.remove(0))
                    }
                }) {
                    Some(result) => result,
                    None => UpdateCheckResult {
                        status: UpdateCheckStatus::CheckFailed(
                            "Installer reported no outcome for this source".to_string(),
                        ),
                        source,
                    },
                }
            })
            .collect()
    }

    /// Install each request, concurrently across requests; results match
    /// the input order positionally. Each request is routed to the first
    /// registered installer whose capability probe accepts it.
    #[tracing::instrument(skip(self, requests, cancel))]
    pub async fn install(
        &self,
        requests: Vec<InstallRequest>,
        cancel: &CancellationToken,
    ) -> Vec<InstallResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        join_all(requests.into_iter().map(|request| async move {
            if cancel.is_cancelled() {
                return InstallResult::failure(
                    request.clone(),
                    InstallerErrorCode::Cancelled,
                    format!("Installation of {} was cancelled", request),
                );
            }

            let mut capable = Vec::new();
            for installer in &self.installers {
                if installer.can_install(&request, cancel).await {
                    capable.push(Arc::clone(installer));
                }
            }
            let Some(installer) = capable.first() else {
                return InstallResult::failure(
                    request.clone(),
                    InstallerErrorCode::UnsupportedRequest,
                    format!("{} cannot be installed", request.identifier),
                );
            };

            self.install_with(Arc::clone(installer), request, cancel).await
        }))
        .await
    }

    async fn install_with(
        &self,
        installer: Arc<dyn Installer>,
        request: InstallRequest,
        cancel: &CancellationToken,
    ) -> InstallResult {
        if let Err((code, message)) = self
            .ensure_install_prerequisites(
                &request.identifier,
                request.version.as_deref(),
                &installer,
                cancel,
                false,
            )
            .await
        {
            return InstallResult::failure(request, code, message);
        }

        let result = installer.install(&request, cancel).await;
        let Some(source) = &result.source else {
            return result;
        };
        if let Err(e) = self.record_installed(&installer, source) {
            return InstallResult::failure(
                request,
                InstallerErrorCode::InstallFailed,
                format!("Failed to persist record for {}: {}", source.identifier, e),
            );
        }
        result
    }

    /// Update each applicable request, concurrently. Requests whose
    /// version already equals the installed version are no-ops and are
    /// dropped up front; results correspond positionally to the applied
    /// subset.
    #[tracing::instrument(skip(self, requests, cancel))]
    pub async fn update(
        &self,
        requests: Vec<UpdateRequest>,
        cancel: &CancellationToken,
    ) -> Vec<UpdateResult> {
        let applicable: Vec<_> = requests
            .into_iter()
            .filter(|request| request.version != request.source.version)
            .collect();

        join_all(
            applicable
                .into_iter()
                .map(|request| self.update_one(request, cancel)),
        )
        .await
    }

    async fn update_one(
        &self,
        request: UpdateRequest,
        cancel: &CancellationToken,
    ) -> UpdateResult {
        if cancel.is_cancelled() {
            return UpdateResult::failure(
                request,
                InstallerErrorCode::Cancelled,
                "Update was cancelled",
            );
        }

        let Some(installer) = self.installers_by_id.get(&request.source.installer_id) else {
            return UpdateResult::failure(
                request.clone(),
                InstallerErrorCode::NotFound,
                format!(
                    "Installer '{}' is not registered",
                    request.source.installer_id
                ),
            );
        };
        let installer = Arc::clone(installer);

        if let Err((code, message)) = self
            .ensure_install_prerequisites(
                &request.source.identifier,
                Some(&request.version),
                &installer,
                cancel,
                true,
            )
            .await
        {
            return UpdateResult::failure(request, code, message);
        }

        let result = installer.update(&request, cancel).await;
        let Some(source) = &result.source else {
            return result;
        };
        if let Err(e) = self.record_installed(&installer, source) {
            return UpdateResult::failure(
                request,
                InstallerErrorCode::UpdateFailed,
                format!("Failed to persist record for {}: {}", source.identifier, e),
            );
        }
        result
    }

    /// Uninstall each source, concurrently; on success the persisted
    /// record is removed.
    #[tracing::instrument(skip(self, sources, cancel))]
    pub async fn uninstall(
        &self,
        sources: Vec<PackageSource>,
        cancel: &CancellationToken,
    ) -> Vec<UninstallResult> {
        if sources.is_empty() {
            return Vec::new();
        }

        join_all(sources.into_iter().map(|source| async move {
            if cancel.is_cancelled() {
                return UninstallResult::failure(
                    source,
                    InstallerErrorCode::Cancelled,
                    "Uninstall was cancelled",
                );
            }

            let Some(installer) = self.installers_by_id.get(&source.installer_id) else {
                return UninstallResult::failure(
                    source.clone(),
                    InstallerErrorCode::NotFound,
                    format!("Installer '{}' is not registered", source.installer_id),
                );
            };

            let known = {
                let state = self.state.lock().expect("provider state poisoned");
                state
                    .sources
                    .get(&source.installer_id)
                    .is_some_and(|sources| sources.contains_key(&source.identifier))
            };
            if !known {
                return UninstallResult::failure(
                    source.clone(),
                    InstallerErrorCode::NotFound,
                    format!("{} is not installed", source.identifier),
                );
            }

            let result = installer.uninstall(&source, cancel).await;
            if result.is_success() {
                self.forget_installed(installer.id(), &source.identifier);
            }
            result
        }))
        .await
    }

    /// Shared install/update prerequisite: when the identifier is
    /// already installed under this installer, either short-circuit
    /// (same version) or tear the old version down first. A failed
    /// teardown aborts the operation with the previous record intact.
    ///
    /// The check-then-act sequence is not atomic across concurrent calls
    /// for the same identifier.
    async fn ensure_install_prerequisites(
        &self,
        identifier: &str,
        version: Option<&str>,
        installer: &Arc<dyn Installer>,
        cancel: &CancellationToken,
        update: bool,
    ) -> Result<(), (InstallerErrorCode, String)> {
        let existing = {
            let state = self.state.lock().expect("provider state poisoned");
            state
                .sources
                .get(installer.id())
                .and_then(|sources| sources.get(identifier))
                .cloned()
        };
        let Some(existing) = existing else {
            return Ok(());
        };

        if version == Some(existing.version.as_str()) {
            return Err((
                InstallerErrorCode::AlreadyInstalled,
                format!("{} is already installed.", existing.display_name),
            ));
        }

        if !update {
            info!(
                "{} is already installed, version: {}, it will be replaced with {}.",
                existing.identifier,
                existing.version,
                version.map_or("the latest version".to_string(), |v| format!("version {v}"))
            );
        }

        let uninstall_result = installer.uninstall(&existing, cancel).await;
        if let Some(error) = uninstall_result.error {
            return Err((InstallerErrorCode::UpdateUninstallFailed, error.message));
        }
        info!("{} was successfully uninstalled.", existing.display_name);
        self.forget_installed(installer.id(), &existing.identifier);
        Ok(())
    }

    fn record_installed(
        &self,
        installer: &Arc<dyn Installer>,
        source: &PackageSource,
    ) -> anyhow::Result<()> {
        self.cache.add(installer.serialize(source))?;
        {
            let mut state = self.state.lock().expect("provider state poisoned");
            state
                .sources
                .entry(source.installer_id.clone())
                .or_default()
                .insert(source.identifier.clone(), source.clone());
        }
        self.notify_sources_changed();
        Ok(())
    }

    fn forget_installed(&self, installer_id: &str, identifier: &str) {
        if let Err(e) = self.cache.remove(installer_id, identifier) {
            warn!(
                "Failed to remove cache record for {}/{}: {}",
                installer_id, identifier, e
            );
        }
        {
            let mut state = self.state.lock().expect("provider state poisoned");
            if let Some(sources) = state.sources.get_mut(installer_id) {
                sources.remove(identifier);
            }
        }
        self.notify_sources_changed();
    }

    fn notify_sources_changed(&self) {
        let listeners = self.listeners.lock().expect("provider listeners poisoned");
        for listener in listeners.iter() {
            listener();
        }
    }
}
