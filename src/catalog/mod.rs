//! Template catalog - the enumerable set of discovered template metadata,
//! grouped by identity.
//!
//! Every installed source is mounted through its locator and scanned for
//! `template.json` manifests, one per template directory under the mount
//! root. Unreadable mounts and malformed manifests are skipped with a
//! warning; discovery never fails as a whole.
//!
//! The catalog listens for the provider's source-set changes and rebuilds
//! lazily on the next [`groups`] call.
//!
//! [`groups`]: TemplateCatalog::groups

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::mount::{MountEntryKind, MountPoint, open_mount};
use crate::provider::SourceProvider;
use crate::runtime::Runtime;

/// Manifest file name looked up in every directory under a mount root.
pub const TEMPLATE_MANIFEST: &str = "template.json";

/// Kind of a declared template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    #[default]
    Text,
    Bool,
    Choice,
}

/// A parameter declared by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateParameter {
    pub name: String,
    #[serde(default)]
    pub data_type: ParameterKind,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub default_value: Option<String>,
}

/// Metadata record for one template, as read from its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateInfo {
    /// Unique identity of this template variant.
    pub identity: String,
    /// Shared identity tying language variants into one group.
    #[serde(default)]
    pub group_identity: Option<String>,
    pub name: String,
    pub short_names: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub template_type: Option<String>,
    #[serde(default)]
    pub baselines: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub parameters: Vec<TemplateParameter>,
}

impl TemplateInfo {
    /// Grouping key: the group identity when declared, the template's own
    /// identity otherwise.
    pub fn group_key(&self) -> &str {
        self.group_identity.as_deref().unwrap_or(&self.identity)
    }

    pub fn parameter(&self, name: &str) -> Option<&TemplateParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Templates sharing a short name, differentiated by language and tags.
/// Read-only once constructed for a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateGroup {
    pub identity: String,
    pub templates: Vec<TemplateInfo>,
}

impl TemplateGroup {
    /// Union of the member templates' short names, in first-seen order.
    pub fn short_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for template in &self.templates {
            for name in &template.short_names {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Distinct languages tagged on member templates, sorted.
    pub fn languages(&self) -> Vec<&str> {
        let mut languages: Vec<&str> = Vec::new();
        for template in &self.templates {
            if let Some(language) = template.language.as_deref()
                && !languages
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(language))
            {
                languages.push(language);
            }
        }
        languages.sort_unstable();
        languages
    }
}

/// Group templates by their group key, deterministically: groups sorted
/// by identity, templates within a group sorted by identity.
pub fn group_templates(templates: Vec<TemplateInfo>) -> Vec<TemplateGroup> {
    let mut by_key: BTreeMap<String, Vec<TemplateInfo>> = BTreeMap::new();
    for template in templates {
        by_key
            .entry(template.group_key().to_string())
            .or_default()
            .push(template);
    }
    by_key
        .into_iter()
        .map(|(identity, mut templates)| {
            templates.sort_by(|a, b| a.identity.cmp(&b.identity));
            TemplateGroup {
                identity,
                templates,
            }
        })
        .collect()
}

/// Read every template manifest reachable from a mount root.
pub fn scan_mount(mount: &dyn MountPoint) -> Vec<TemplateInfo> {
    let entries = match mount.list_dir("") {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list mount {}: {}", mount.uri(), e);
            return Vec::new();
        }
    };

    let mut templates = Vec::new();
    for entry in entries {
        if entry.kind != MountEntryKind::Directory {
            continue;
        }
        let manifest_path = format!("{}/{}", entry.name, TEMPLATE_MANIFEST);
        if mount.stat(&manifest_path) != Some(MountEntryKind::File) {
            continue;
        }
        let bytes = match mount.read_file(&manifest_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read {} from {}: {}", manifest_path, mount.uri(), e);
                continue;
            }
        };
        match serde_json::from_slice::<TemplateInfo>(&bytes) {
            Ok(template) => templates.push(template),
            Err(e) => {
                warn!(
                    "Malformed template manifest {} in {}: {}",
                    manifest_path,
                    mount.uri(),
                    e
                );
            }
        }
    }
    templates
}

/// Catalog over the provider's installed sources.
pub struct TemplateCatalog<R: Runtime> {
    runtime: Arc<R>,
    provider: Arc<SourceProvider<R>>,
    /// `None` marks the cached grouping as stale.
    groups: Mutex<Option<Vec<TemplateGroup>>>,
}

impl<R: Runtime + 'static> TemplateCatalog<R> {
    /// Build a catalog and subscribe it to the provider's source-set
    /// changes.
    pub fn new(runtime: Arc<R>, provider: Arc<SourceProvider<R>>) -> Arc<Self> {
        let catalog = Arc::new(Self {
            runtime,
            provider: Arc::clone(&provider),
            groups: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&catalog);
        provider.on_sources_changed(move || {
            if let Some(catalog) = weak.upgrade() {
                *catalog.groups.lock().expect("catalog state poisoned") = None;
            }
        });

        catalog
    }

    /// Current template groups, rebuilt from the mounted sources when the
    /// source set changed since the last call.
    #[tracing::instrument(skip(self))]
    pub fn groups(&self) -> Vec<TemplateGroup> {
        let mut cached = self.groups.lock().expect("catalog state poisoned");
        if let Some(groups) = cached.as_ref() {
            return groups.clone();
        }

        let mut templates = Vec::new();
        for entry in self.provider.list_sources() {
            let uri = entry.mount_uri();
            let mount = match open_mount(&self.runtime, uri) {
                Ok(mount) => mount,
                Err(e) => {
                    warn!("Failed to mount {}: {}", uri, e);
                    continue;
                }
            };
            let found = scan_mount(mount.as_ref());
            debug!("Found {} template(s) in {}", found.len(), uri);
            templates.extend(found);
        }

        let groups = group_templates(templates);
        *cached = Some(groups.clone());
        groups
    }
}
