use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tpman::commands;
use tpman::commands::ResolveOptions;

/// tpman - Template Pack Manager
///
/// Install, update and resolve template packs for code scaffolding.
///
/// Packs are folders or archives of template directories, each carrying a
/// template.json manifest. Installed packs are recorded in a shared cache
/// under the root directory.
///
/// Examples:
///   tpman install ./my-templates            # Install a folder pack
///   tpman resolve console --language F#     # Find the matching template
#[derive(Parser, Debug)]
#[command(author, version = env!("TPMAN_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root directory for the cache and managed packs (also via TPMAN_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "TPMAN_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub root: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install template packs from folders or archives
    Install(InstallArgs),

    /// Uninstall installed template packs
    Uninstall(UninstallArgs),

    /// Update installed template packs
    Update(UpdateArgs),

    /// Check installed template packs for available updates
    Check(CheckArgs),

    /// List installed template packs
    List,

    /// Resolve a template name against the installed catalog
    Resolve(ResolveArgs),
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Paths of the packs to install (directories or .tar.gz/.tgz/.zip)
    #[arg(value_name = "PACK", required = true)]
    packs: Vec<String>,

    /// Version to record for the installed packs
    #[arg(long, short = 'v', value_name = "VERSION")]
    version: Option<String>,
}

#[derive(clap::Args, Debug)]
struct UninstallArgs {
    /// Identifiers or display names of the packs to uninstall
    #[arg(value_name = "PACK", required = true)]
    packs: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct UpdateArgs {
    /// Packs to update (all managed packs when omitted)
    #[arg(value_name = "PACK")]
    packs: Vec<String>,

    /// Update to exactly this version instead of the latest available
    #[arg(long, short = 'v', value_name = "VERSION")]
    version: Option<String>,
}

#[derive(clap::Args, Debug)]
struct CheckArgs {
    /// Packs to check (all managed packs when omitted)
    #[arg(value_name = "PACK")]
    packs: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct ResolveArgs {
    /// Template short name to resolve
    #[arg(value_name = "NAME")]
    name: String,

    /// Template language (e.g. "C#", "F#")
    #[arg(long, short = 'l')]
    language: Option<String>,

    /// Template type (e.g. "project", "item")
    #[arg(long = "type", value_name = "TYPE")]
    template_type: Option<String>,

    /// Baseline tag the template must declare
    #[arg(long)]
    baseline: Option<String>,

    /// Parameter constraints as key=value (repeatable)
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Language preferred when the name alone is ambiguous
    #[arg(long, value_name = "LANGUAGE")]
    default_language: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = tpman::runtime::RealRuntime;

    match cli.command {
        Commands::Install(args) => {
            commands::install(runtime, args.packs, args.version, cli.root).await?
        }
        Commands::Uninstall(args) => commands::uninstall(runtime, args.packs, cli.root).await?,
        Commands::Update(args) => {
            commands::update(runtime, args.packs, args.version, cli.root).await?
        }
        Commands::Check(args) => commands::check(runtime, args.packs, cli.root).await?,
        Commands::List => commands::list(runtime, cli.root).await?,
        Commands::Resolve(args) => {
            let options = ResolveOptions {
                name: args.name,
                language: args.language,
                template_type: args.template_type,
                baseline: args.baseline,
                parameters: args.params,
                default_language: args.default_language,
            };
            commands::resolve(runtime, options, cli.root).await?
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from(["tpman", "install", "./pack"]).unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.packs, vec!["./pack"]);
                assert_eq!(args.version, None);
            }
            _ => panic!("Expected Install command"),
        }
        assert_eq!(cli.root, None);
    }

    #[test]
    fn test_cli_install_with_version_and_root() {
        let cli = Cli::try_parse_from([
            "tpman", "install", "./pack", "-v", "2.0", "--root", "/tmp/tpman",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.version, Some("2.0".to_string()));
            }
            _ => panic!("Expected Install command"),
        }
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/tpman")));
    }

    #[test]
    fn test_cli_install_requires_a_pack() {
        assert!(Cli::try_parse_from(["tpman", "install"]).is_err());
    }

    #[test]
    fn test_cli_resolve_parsing() {
        let cli = Cli::try_parse_from([
            "tpman",
            "resolve",
            "console",
            "--language",
            "F#",
            "--param",
            "framework=net9.0",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve(args) => {
                assert_eq!(args.name, "console");
                assert_eq!(args.language, Some("F#".to_string()));
                assert_eq!(args.params, vec!["framework=net9.0"]);
            }
            _ => panic!("Expected Resolve command"),
        }
    }

    #[test]
    fn test_cli_update_defaults_to_all() {
        let cli = Cli::try_parse_from(["tpman", "update"]).unwrap();
        match cli.command {
            Commands::Update(args) => {
                assert!(args.packs.is_empty());
                assert_eq!(args.version, None);
            }
            _ => panic!("Expected Update command"),
        }
    }

    #[test]
    fn test_cli_global_root_before_subcommand() {
        let cli = Cli::try_parse_from(["tpman", "--root", "/tmp", "list"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        assert!(Cli::try_parse_from(["tpman", "./pack"]).is_err());
    }
}
