use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::catalog::TemplateCatalog;
use crate::resolution::{Resolution, ResolutionCriteria, TemplateMatchInfo, resolve as run_resolution};
use crate::runtime::Runtime;

/// Arguments of the `resolve` command.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub name: String,
    pub language: Option<String>,
    pub template_type: Option<String>,
    pub baseline: Option<String>,
    /// `key=value` pairs as typed on the command line.
    pub parameters: Vec<String>,
    pub default_language: Option<String>,
}

/// Resolve a template request against the installed catalog and print
/// the outcome. Ambiguity and no-match exit non-zero with enough
/// metadata to refine the request.
#[tracing::instrument(skip(runtime, options, root))]
pub async fn resolve<R: Runtime + 'static>(
    runtime: R,
    options: ResolveOptions,
    root: Option<PathBuf>,
) -> Result<()> {
    let workspace = super::open_workspace(runtime, root)?;
    let catalog = TemplateCatalog::new(Arc::clone(&workspace.runtime), workspace.provider.clone());

    let mut parameters = BTreeMap::new();
    for pair in &options.parameters {
        let (key, value) = parse_parameter(pair)?;
        parameters.insert(key, value);
    }

    let criteria = ResolutionCriteria {
        name: options.name.clone(),
        language: options.language,
        template_type: options.template_type,
        baseline: options.baseline,
        parameters,
    };

    let result = run_resolution(
        catalog.groups(),
        &criteria,
        options.default_language.as_deref(),
    );

    match result.resolution() {
        Resolution::Unambiguous(info) => {
            println!("{}", describe(&info));
            Ok(())
        }
        Resolution::Ambiguous(candidates) => {
            eprintln!("'{}' matches more than one template:", options.name);
            for candidate in &candidates {
                eprintln!("  {}", describe(candidate));
            }
            bail!(
                "Ambiguous template name '{}'; refine the request (e.g. --language)",
                options.name
            );
        }
        Resolution::NoMatch => {
            bail!("No templates matched '{}'", options.name);
        }
    }
}

fn describe(info: &TemplateMatchInfo) -> String {
    let template = &info.template;
    let mut line = format!(
        "{} [{}]",
        template.name,
        template.short_names.join(", ")
    );
    if let Some(language) = &template.language {
        line.push_str(&format!(" ({})", language));
    }
    line
}

/// Parse a `key=value` command line parameter.
pub fn parse_parameter(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("Invalid parameter '{}'. Expected key=value.", pair),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parameter() {
        assert_eq!(
            parse_parameter("framework=net9.0").unwrap(),
            ("framework".to_string(), "net9.0".to_string())
        );
        assert_eq!(
            parse_parameter("title=a=b").unwrap(),
            ("title".to_string(), "a=b".to_string())
        );
        assert!(parse_parameter("no-equals").is_err());
        assert!(parse_parameter("=value").is_err());
    }

    #[test]
    fn test_describe_includes_language() {
        use crate::catalog::TemplateInfo;
        use std::collections::BTreeMap;

        let info = TemplateMatchInfo {
            template: TemplateInfo {
                identity: "Console.CSharp".to_string(),
                group_identity: None,
                name: "Console application".to_string(),
                short_names: vec!["console".to_string()],
                language: Some("C#".to_string()),
                template_type: None,
                baselines: Vec::new(),
                tags: BTreeMap::new(),
                parameters: Vec::new(),
            },
            matches: Vec::new(),
        };
        assert_eq!(describe(&info), "Console application [console] (C#)");
    }
}
