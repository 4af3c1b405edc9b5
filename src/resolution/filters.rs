//! Built-in filters and the resolution entry point.

use std::collections::BTreeMap;

use crate::catalog::{ParameterKind, TemplateGroup, TemplateInfo};

use super::{
    GroupFilter, MatchInfo, TemplateFilter, TemplateGroupMatchInfo, TemplateResolutionResult,
    filter_names,
};

/// What the caller asked to resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionCriteria {
    /// Requested short name; matched exactly against group short names.
    pub name: String,
    pub language: Option<String>,
    pub template_type: Option<String>,
    pub baseline: Option<String>,
    /// Parameter name -> requested value, validated against each
    /// template's declared parameter set.
    pub parameters: BTreeMap<String, String>,
}

/// Resolve the criteria against a catalog snapshot.
///
/// `default_language` disambiguates multi-language groups when no
/// language was requested; it never filters a group out on its own.
#[tracing::instrument(skip(groups, criteria, default_language))]
pub fn resolve(
    groups: Vec<TemplateGroup>,
    criteria: &ResolutionCriteria,
    default_language: Option<&str>,
) -> TemplateResolutionResult {
    let group_filters: Vec<GroupFilter> = vec![
        exact_short_name_filter(criteria.name.clone()),
        group_language_filter(criteria.language.clone()),
    ];

    let mut sorted = groups;
    sorted.sort_by(|a, b| a.identity.cmp(&b.identity));

    let matched = sorted
        .into_iter()
        .map(|group| {
            let template_filters: Vec<TemplateFilter> = vec![
                language_evidence_filter(
                    criteria.language.clone(),
                    default_language.map(String::from),
                    group.languages().len(),
                ),
                type_filter(criteria.template_type.clone()),
                baseline_filter(criteria.baseline.clone()),
            ];
            let parameters = criteria.parameters.clone();
            TemplateGroupMatchInfo::apply_filters(
                group,
                &group_filters,
                &template_filters,
                |template| parameter_matches(template, &parameters),
            )
        })
        .collect();

    TemplateResolutionResult::new(matched)
}

/// Group filter: the requested short name must be one of the group's
/// short names, verbatim.
pub fn exact_short_name_filter(name: String) -> GroupFilter {
    Box::new(move |group| {
        if group.short_names().contains(&name.as_str()) {
            Some(MatchInfo::exact(filter_names::NAME, Some(&name)))
        } else {
            Some(MatchInfo::mismatch(filter_names::NAME, Some(&name)))
        }
    })
}

/// Group filter: when a language is requested, the group must contain a
/// template in that language. Without a requested language the filter has
/// no opinion; disambiguation happens per template.
pub fn group_language_filter(language: Option<String>) -> GroupFilter {
    Box::new(move |group| {
        let language = language.as_deref()?;
        let present = group
            .languages()
            .iter()
            .any(|known| known.eq_ignore_ascii_case(language));
        if present {
            Some(MatchInfo::exact(filter_names::LANGUAGE, Some(language)))
        } else {
            Some(MatchInfo::mismatch(filter_names::LANGUAGE, Some(language)))
        }
    })
}

/// Template filter carrying per-template language evidence.
///
/// With a requested language, only templates tagged with it match. With
/// none, an untagged template or a single-language group's sole language
/// is exact; in a multi-language group the caller-supplied default
/// language picks the exact variant and the others remain partial, so an
/// unambiguous winner can emerge without silently dropping the rest.
pub fn language_evidence_filter(
    requested: Option<String>,
    default_language: Option<String>,
    group_language_count: usize,
) -> TemplateFilter {
    Box::new(move |template| {
        if let Some(requested) = requested.as_deref() {
            let kind = match template.language.as_deref() {
                Some(language) if language.eq_ignore_ascii_case(requested) => {
                    MatchInfo::exact(filter_names::LANGUAGE, Some(requested))
                }
                _ => MatchInfo::mismatch(filter_names::LANGUAGE, Some(requested)),
            };
            return Some(kind);
        }

        let Some(language) = template.language.as_deref() else {
            return Some(MatchInfo::exact(filter_names::LANGUAGE, None));
        };
        if group_language_count <= 1 {
            return Some(MatchInfo::exact(filter_names::LANGUAGE, None));
        }
        match default_language.as_deref() {
            Some(default) if default.eq_ignore_ascii_case(language) => {
                Some(MatchInfo::exact(filter_names::LANGUAGE, None))
            }
            _ => Some(MatchInfo::partial(filter_names::LANGUAGE, None)),
        }
    })
}

/// Template filter: type classification (e.g. "project" / "item").
pub fn type_filter(template_type: Option<String>) -> TemplateFilter {
    Box::new(move |template| {
        let requested = template_type.as_deref()?;
        let kind = match template.template_type.as_deref() {
            Some(declared) if declared.eq_ignore_ascii_case(requested) => {
                MatchInfo::exact(filter_names::TYPE, Some(requested))
            }
            _ => MatchInfo::mismatch(filter_names::TYPE, Some(requested)),
        };
        Some(kind)
    })
}

/// Template filter: requested baseline tag must be declared.
pub fn baseline_filter(baseline: Option<String>) -> TemplateFilter {
    Box::new(move |template| {
        let requested = baseline.as_deref()?;
        let declared = template
            .baselines
            .iter()
            .any(|b| b.eq_ignore_ascii_case(requested));
        let kind = if declared {
            MatchInfo::exact(filter_names::BASELINE, Some(requested))
        } else {
            MatchInfo::mismatch(filter_names::BASELINE, Some(requested))
        };
        Some(kind)
    })
}

/// Validate each provided parameter against the template's declared
/// parameter set. Every parameter leaves its own evidence, tagged with
/// the parameter name.
pub fn parameter_matches(
    template: &TemplateInfo,
    parameters: &BTreeMap<String, String>,
) -> Vec<MatchInfo> {
    parameters
        .iter()
        .map(|(name, value)| {
            let Some(declared) = template.parameter(name) else {
                return MatchInfo::mismatch(name.clone(), Some(value));
            };
            let valid = match declared.data_type {
                ParameterKind::Text => true,
                ParameterKind::Bool => {
                    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false")
                }
                ParameterKind::Choice => declared.choices.iter().any(|choice| choice == value),
            };
            if valid {
                MatchInfo::exact(name.clone(), Some(value))
            } else {
                MatchInfo::mismatch(name.clone(), Some(value))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{TemplateParameter, group_templates};
    use crate::resolution::{MatchKind, Resolution};

    fn template(
        identity: &str,
        group: Option<&str>,
        short_name: &str,
        language: Option<&str>,
    ) -> TemplateInfo {
        TemplateInfo {
            identity: identity.to_string(),
            group_identity: group.map(String::from),
            name: identity.to_string(),
            short_names: vec![short_name.to_string()],
            language: language.map(String::from),
            template_type: Some("project".to_string()),
            baselines: Vec::new(),
            tags: BTreeMap::new(),
            parameters: Vec::new(),
        }
    }

    /// Catalog used throughout: "console" in C# and F#, "classlib" in C#.
    fn catalog() -> Vec<TemplateGroup> {
        group_templates(vec![
            template("Console.CSharp", Some("Console.App"), "console", Some("C#")),
            template("Console.FSharp", Some("Console.App"), "console", Some("F#")),
            template("ClassLib.CSharp", None, "classlib", Some("C#")),
        ])
    }

    fn criteria(name: &str) -> ResolutionCriteria {
        ResolutionCriteria {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_requested_language_selects_variant() {
        let criteria = ResolutionCriteria {
            language: Some("F#".to_string()),
            ..criteria("console")
        };
        let result = resolve(catalog(), &criteria, None);
        match result.resolution() {
            Resolution::Unambiguous(info) => {
                assert_eq!(info.template.identity, "Console.FSharp");
            }
            other => panic!("Expected unambiguous match, got {:?}", other),
        }
    }

    #[test]
    fn test_default_language_disambiguates() {
        let result = resolve(catalog(), &criteria("console"), Some("C#"));
        match result.resolution() {
            Resolution::Unambiguous(info) => {
                assert_eq!(info.template.identity, "Console.CSharp");
            }
            other => panic!("Expected unambiguous match, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_language_yields_no_match() {
        let criteria = ResolutionCriteria {
            language: Some("VB".to_string()),
            ..criteria("console")
        };
        let result = resolve(catalog(), &criteria, None);
        assert_eq!(result.resolution(), Resolution::NoMatch);
    }

    #[test]
    fn test_unknown_name_yields_no_match() {
        let result = resolve(catalog(), &criteria("webapi"), Some("C#"));
        assert_eq!(result.resolution(), Resolution::NoMatch);
    }

    #[test]
    fn test_single_language_group_needs_no_disambiguation() {
        let result = resolve(catalog(), &criteria("classlib"), None);
        match result.resolution() {
            Resolution::Unambiguous(info) => {
                assert_eq!(info.template.identity, "ClassLib.CSharp");
            }
            other => panic!("Expected unambiguous match, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_language_group_without_default_is_ambiguous() {
        let result = resolve(catalog(), &criteria("console"), None);
        match result.resolution() {
            Resolution::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("Expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_identical_short_names_without_language_are_ambiguous() {
        // Two templates with the same short name and no language tag at all
        let groups = group_templates(vec![
            template("One", Some("Tool"), "tool", None),
            template("Two", Some("Tool"), "tool", None),
        ]);
        let result = resolve(groups, &criteria("tool"), None);
        match result.resolution() {
            Resolution::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("Expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let run = || resolve(catalog(), &criteria("console"), Some("C#"));
        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert_eq!(first.resolution(), second.resolution());
    }

    #[test]
    fn test_type_filter_mismatch_excludes_template() {
        let criteria = ResolutionCriteria {
            template_type: Some("item".to_string()),
            ..criteria("classlib")
        };
        let result = resolve(catalog(), &criteria, None);
        assert_eq!(result.resolution(), Resolution::NoMatch);
    }

    #[test]
    fn test_baseline_filter() {
        let mut with_baseline = template("Console.CSharp", None, "console", Some("C#"));
        with_baseline.baselines = vec!["standard".to_string()];
        let groups = group_templates(vec![with_baseline]);

        let matched = ResolutionCriteria {
            baseline: Some("standard".to_string()),
            ..criteria("console")
        };
        assert!(matches!(
            resolve(groups.clone(), &matched, None).resolution(),
            Resolution::Unambiguous(_)
        ));

        let mismatched = ResolutionCriteria {
            baseline: Some("minimal".to_string()),
            ..criteria("console")
        };
        assert_eq!(
            resolve(groups, &mismatched, None).resolution(),
            Resolution::NoMatch
        );
    }

    #[test]
    fn test_parameter_validation() {
        let declared = TemplateInfo {
            parameters: vec![
                TemplateParameter {
                    name: "framework".to_string(),
                    data_type: ParameterKind::Choice,
                    choices: vec!["net8.0".to_string(), "net9.0".to_string()],
                    default_value: Some("net9.0".to_string()),
                },
                TemplateParameter {
                    name: "skip-restore".to_string(),
                    data_type: ParameterKind::Bool,
                    choices: Vec::new(),
                    default_value: None,
                },
                TemplateParameter {
                    name: "title".to_string(),
                    data_type: ParameterKind::Text,
                    choices: Vec::new(),
                    default_value: None,
                },
            ],
            ..template("Console.CSharp", None, "console", Some("C#"))
        };

        let mut parameters = BTreeMap::new();
        parameters.insert("framework".to_string(), "net9.0".to_string());
        parameters.insert("skip-restore".to_string(), "TRUE".to_string());
        parameters.insert("title".to_string(), "anything".to_string());
        let matches = parameter_matches(&declared, &parameters);
        assert!(matches.iter().all(|m| m.kind == MatchKind::Exact));

        // Invalid choice value
        let mut parameters = BTreeMap::new();
        parameters.insert("framework".to_string(), "net5.0".to_string());
        let matches = parameter_matches(&declared, &parameters);
        assert_eq!(matches[0].kind, MatchKind::Mismatch);
        assert_eq!(matches[0].filter, "framework");

        // Unknown parameter name
        let mut parameters = BTreeMap::new();
        parameters.insert("no-such-param".to_string(), "x".to_string());
        let matches = parameter_matches(&declared, &parameters);
        assert_eq!(matches[0].kind, MatchKind::Mismatch);
    }

    #[test]
    fn test_invalid_parameter_excludes_template_from_resolution() {
        let mut with_params = template("Console.CSharp", None, "console", Some("C#"));
        with_params.parameters = vec![TemplateParameter {
            name: "framework".to_string(),
            data_type: ParameterKind::Choice,
            choices: vec!["net9.0".to_string()],
            default_value: None,
        }];
        let groups = group_templates(vec![with_params]);

        let mut parameters = BTreeMap::new();
        parameters.insert("framework".to_string(), "net4.8".to_string());
        let criteria = ResolutionCriteria {
            parameters,
            ..criteria("console")
        };
        assert_eq!(resolve(groups, &criteria, None).resolution(), Resolution::NoMatch);
    }

    #[test]
    fn test_match_info_explains_failure() {
        let criteria = ResolutionCriteria {
            language: Some("VB".to_string()),
            ..criteria("console")
        };
        let result = resolve(catalog(), &criteria, None);

        // The console group records the language mismatch at group stage
        let console_group = result
            .groups
            .iter()
            .find(|g| g.group.identity == "Console.App")
            .unwrap();
        assert!(
            console_group
                .group_matches
                .iter()
                .any(|m| m.filter == filter_names::LANGUAGE && m.kind == MatchKind::Mismatch)
        );

        // The classlib group records the name mismatch
        let classlib_group = result
            .groups
            .iter()
            .find(|g| g.group.identity == "ClassLib.CSharp")
            .unwrap();
        assert!(
            classlib_group
                .group_matches
                .iter()
                .any(|m| m.filter == filter_names::NAME && m.kind == MatchKind::Mismatch)
        );
    }
}
