//! Template resolution - scores the catalog's template groups against an
//! ordered set of filters and classifies the outcome.
//!
//! Filters run in two stages: group filters apply once per group (short
//! name, requested language), template filters apply per template inside
//! the group (language disambiguation, type, baseline, parameters). Every
//! filter leaves a [`MatchInfo`] trace so a caller can explain why a
//! template did or did not match.
//!
//! "No match" and "ambiguous" are first-class outcomes, not errors, and
//! ambiguity among multiple exact matches is always surfaced rather than
//! silently broken.

mod filters;

use crate::catalog::{TemplateGroup, TemplateInfo};

pub use filters::{ResolutionCriteria, resolve};

/// How a single filter judged a group or template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    /// Passed without being an exact match; keeps the template a
    /// candidate but blocks unambiguous selection.
    Partial,
    Mismatch,
}

/// Names of the built-in filters, used to tag their evidence. Parameter
/// filters are tagged with the parameter's own name instead.
pub mod filter_names {
    pub const NAME: &str = "name";
    pub const LANGUAGE: &str = "language";
    pub const TYPE: &str = "type";
    pub const BASELINE: &str = "baseline";
}

/// Evidence left by one filter: which filter, what was requested, and at
/// what kind it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInfo {
    pub filter: String,
    pub requested: Option<String>,
    pub kind: MatchKind,
}

impl MatchInfo {
    pub fn exact(filter: impl Into<String>, requested: Option<&str>) -> Self {
        Self::new(filter, requested, MatchKind::Exact)
    }

    pub fn partial(filter: impl Into<String>, requested: Option<&str>) -> Self {
        Self::new(filter, requested, MatchKind::Partial)
    }

    pub fn mismatch(filter: impl Into<String>, requested: Option<&str>) -> Self {
        Self::new(filter, requested, MatchKind::Mismatch)
    }

    fn new(filter: impl Into<String>, requested: Option<&str>, kind: MatchKind) -> Self {
        Self {
            filter: filter.into(),
            requested: requested.map(String::from),
            kind,
        }
    }
}

/// A filter judging a whole group; `None` means the filter has no opinion.
pub type GroupFilter = Box<dyn Fn(&TemplateGroup) -> Option<MatchInfo>>;

/// A filter judging one template inside a group; `None` means
/// inapplicable.
pub type TemplateFilter = Box<dyn Fn(&TemplateInfo) -> Option<MatchInfo>>;

/// One template's aggregate evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMatchInfo {
    pub template: TemplateInfo,
    pub matches: Vec<MatchInfo>,
}

impl TemplateMatchInfo {
    /// A candidate has no hard mismatch among its applicable filters.
    pub fn is_candidate(&self) -> bool {
        self.matches.iter().all(|m| m.kind != MatchKind::Mismatch)
    }

    /// An exact match is a candidate whose every applicable filter is
    /// exact, not merely passed.
    pub fn is_exact(&self) -> bool {
        self.matches.iter().all(|m| m.kind == MatchKind::Exact)
    }
}

/// One group's aggregate evidence: group-stage matches plus per-template
/// evidence for its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateGroupMatchInfo {
    pub group: TemplateGroup,
    pub group_matches: Vec<MatchInfo>,
    pub templates: Vec<TemplateMatchInfo>,
}

impl TemplateGroupMatchInfo {
    /// Apply both filter stages to a group. Template-stage evidence is
    /// collected even when the group stage fails, so callers can explain
    /// near-misses; candidacy still requires the group stage to pass.
    pub fn apply_filters(
        group: TemplateGroup,
        group_filters: &[GroupFilter],
        template_filters: &[TemplateFilter],
        parameter_filter: impl Fn(&TemplateInfo) -> Vec<MatchInfo>,
    ) -> Self {
        let group_matches: Vec<MatchInfo> = group_filters
            .iter()
            .filter_map(|filter| filter(&group))
            .collect();

        let templates = group
            .templates
            .iter()
            .map(|template| {
                let mut matches: Vec<MatchInfo> = template_filters
                    .iter()
                    .filter_map(|filter| filter(template))
                    .collect();
                matches.extend(parameter_filter(template));
                TemplateMatchInfo {
                    template: template.clone(),
                    matches,
                }
            })
            .collect();

        Self {
            group,
            group_matches,
            templates,
        }
    }

    pub fn is_group_candidate(&self) -> bool {
        self.group_matches
            .iter()
            .all(|m| m.kind != MatchKind::Mismatch)
    }

    fn is_group_exact(&self) -> bool {
        self.group_matches.iter().all(|m| m.kind == MatchKind::Exact)
    }

    /// Member templates that survived both stages.
    pub fn candidates(&self) -> Vec<&TemplateMatchInfo> {
        if !self.is_group_candidate() {
            return Vec::new();
        }
        self.templates
            .iter()
            .filter(|template| template.is_candidate())
            .collect()
    }

    /// Member templates exact at both stages.
    pub fn exact_matches(&self) -> Vec<&TemplateMatchInfo> {
        if !self.is_group_candidate() || !self.is_group_exact() {
            return Vec::new();
        }
        self.templates
            .iter()
            .filter(|template| template.is_exact())
            .collect()
    }
}

/// Final classification of a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one template was exact at every applicable filter.
    Unambiguous(TemplateMatchInfo),
    /// More than one exact match, or surviving candidates without an
    /// exact winner; carries the list for a disambiguation prompt.
    Ambiguous(Vec<TemplateMatchInfo>),
    NoMatch,
}

/// Aggregated per-group evidence for one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateResolutionResult {
    pub groups: Vec<TemplateGroupMatchInfo>,
}

impl TemplateResolutionResult {
    pub fn new(groups: Vec<TemplateGroupMatchInfo>) -> Self {
        Self { groups }
    }

    /// Classify the pass. No ranking is applied beyond the exact/partial
    /// distinction.
    pub fn resolution(&self) -> Resolution {
        let exact: Vec<&TemplateMatchInfo> = self
            .groups
            .iter()
            .flat_map(|group| group.exact_matches())
            .collect();
        if exact.len() == 1 {
            return Resolution::Unambiguous(exact[0].clone());
        }

        let candidates: Vec<&TemplateMatchInfo> = self
            .groups
            .iter()
            .flat_map(|group| group.candidates())
            .collect();
        if candidates.is_empty() {
            return Resolution::NoMatch;
        }

        let surviving = if exact.is_empty() { candidates } else { exact };
        Resolution::Ambiguous(surviving.into_iter().cloned().collect())
    }
}
