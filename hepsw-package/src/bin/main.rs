//! HepSW package index CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hepsw_package::manifest::{
    diff_manifests, flatten_manifest, validate_manifest, walk_manifest, Variables,
};
use hepsw_package::{
    sync_index, DependencyNode, HepswConfig, Index, Manifest, PackageSpecifier, SyncOptions,
};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "hepsw")]
#[command(about = "HepSW package index", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, env = "HEPSW_CONFIG")]
    config: Option<PathBuf>,

    /// More log output (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the local index up to date with the remote
    Sync {
        /// Recreate the local index and refetch everything
        #[arg(long)]
        force: bool,
    },

    /// Search packages by name, or by tag with `--tag`
    Search {
        /// Search term
        term: Option<String>,

        /// Match the name exactly
        #[arg(long)]
        exact: bool,

        /// Match any of the given tags instead of a name
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// List packages by name
    List {
        #[arg(long, default_value = "50")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show a package version (`name`, `name@version` or `name:version`)
    Info { package: String },

    /// List every version of a package
    Versions { name: String },

    /// Print the dependency tree of a package version
    Tree {
        package: String,

        /// Include optional dependencies
        #[arg(long)]
        optional: bool,

        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// List required transitive dependencies
    Flatten { package: String },

    /// Check a package version for dependency cycles
    Cycles { package: String },

    /// List package versions depending on a package
    Rdeps { name: String },

    /// Per-package version counts
    Stats,

    /// Work with manifest files
    #[command(subcommand)]
    Manifest(ManifestCommands),
}

#[derive(Subcommand)]
enum ManifestCommands {
    /// Lint a manifest
    Validate {
        path: PathBuf,

        /// Fail on warnings too
        #[arg(long)]
        strict: bool,
    },

    /// Simulate the recipe without running anything
    Walk {
        path: PathBuf,

        /// Enabled build options
        #[arg(short = 'o', long = "option", value_delimiter = ',')]
        options: Vec<String>,

        /// Extra variables as KEY=VALUE
        #[arg(short = 'V', long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },

    /// Dependencies that apply for a set of options
    Deps {
        path: PathBuf,

        #[arg(short = 'o', long = "option", value_delimiter = ',')]
        options: Vec<String>,
    },

    /// Print the manifest projected onto a set of options
    Flatten {
        path: PathBuf,

        #[arg(short = 'o', long = "option", value_delimiter = ',')]
        options: Vec<String>,
    },

    /// Show top-level differences between two manifests
    Diff { old: PathBuf, new: PathBuf },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => HepswConfig::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => HepswConfig::load()?,
    };

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => config.user.verbosity.parse().unwrap_or(Level::INFO),
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sync { force } => {
            let options = SyncOptions {
                force,
                ..SyncOptions::default()
            };
            let report = sync_index(&mut config, &options)?;
            for table in &report.tables {
                println!("{:<20} {:>8} rows  {:?}", table.table, table.rows, table.mode);
            }
            println!("Synced {} rows", report.total_rows());
        }

        Commands::Search { term, exact, tags } => {
            let index = Index::open(&config)?;
            let packages = if tags.is_empty() {
                index.search_packages(term.as_deref().unwrap_or_default(), exact)?
            } else {
                let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
                index.search_by_tags(&tags)?
            };
            for package in packages {
                println!("{} - {}", package.name, package.description);
            }
        }

        Commands::List { limit, offset } => {
            let index = Index::open(&config)?;
            for package in index.list_packages(limit, offset)? {
                println!("{} - {}", package.name, package.description);
            }
        }

        Commands::Info { package } => {
            let spec: PackageSpecifier = package.parse()?;
            let index = Index::open(&config)?;
            let found = index.get_package(&spec.name)?;
            let version = index.get_version(&spec.name, &spec.version)?;

            println!("{}@{}", found.name, version.version);
            println!("  {}", found.description);
            if !found.tags.is_empty() {
                println!("  tags: {}", found.tags().join(", "));
            }
            println!("  source: {} {}", version.source_type, version.source_url);
            if let Some(source_ref) = &version.source_ref {
                println!("  ref: {}", source_ref);
            }
            println!("  manifest: {}", version.manifest_url);
            println!("  published: {}", version.published_at);
            if !version.is_available() {
                println!("  (deprecated or yanked)");
            }
            for dep in index.get_dependencies(&spec.name, &spec.version)? {
                let optional = if dep.optional { " (optional)" } else { "" };
                println!(
                    "  depends on {} {}{}",
                    dep.dependency_name, dep.version_constraint, optional
                );
            }
        }

        Commands::Versions { name } => {
            let index = Index::open(&config)?;
            for version in index.get_all_versions(&name)? {
                let flag = if version.yanked {
                    " yanked"
                } else if version.deprecated {
                    " deprecated"
                } else {
                    ""
                };
                println!("{} {}{}", version.version, version.published_at, flag);
            }
        }

        Commands::Tree {
            package,
            optional,
            json,
        } => {
            let spec: PackageSpecifier = package.parse()?;
            let index = Index::open(&config)?;
            let tree = index.resolve_dependency_tree(&spec.name, &spec.version, optional)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print_tree(&tree, 0);
            }
        }

        Commands::Flatten { package } => {
            let spec: PackageSpecifier = package.parse()?;
            let index = Index::open(&config)?;
            for name in index.get_all_dependencies(&spec.name, &spec.version)? {
                println!("{}", name);
            }
        }

        Commands::Cycles { package } => {
            let spec: PackageSpecifier = package.parse()?;
            let index = Index::open(&config)?;
            match index.check_circular_dependencies(&spec.name, &spec.version)? {
                Some(path) => {
                    println!("Circular dependency: {}", path.join(" -> "));
                    std::process::exit(1);
                }
                None => println!("No circular dependencies"),
            }
        }

        Commands::Rdeps { name } => {
            let index = Index::open(&config)?;
            for rdep in index.get_reverse_dependencies(&name)? {
                println!(
                    "{}@{} requires {} {}",
                    rdep.dependent_package,
                    rdep.dependent_version,
                    rdep.dependency_name,
                    rdep.version_constraint
                );
            }
        }

        Commands::Stats => {
            let index = Index::open(&config)?;
            for stats in index.get_package_stats()? {
                let latest = stats
                    .latest_release
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<24} {:>4} versions  latest {}", stats.name, stats.version_count, latest);
            }
        }

        Commands::Manifest(cmd) => handle_manifest_command(cmd, &config)?,
    }

    Ok(())
}

fn handle_manifest_command(cmd: ManifestCommands, config: &HepswConfig) -> Result<()> {
    match cmd {
        ManifestCommands::Validate { path, strict } => {
            let manifest = Manifest::from_file(&path)?;
            let report = validate_manifest(&manifest);
            for issue in &report.issues {
                println!("{}", issue);
            }
            report.into_result(strict)?;
            println!("{} is valid", manifest.full_identifier());
        }

        ManifestCommands::Walk {
            path,
            options,
            vars,
        } => {
            let manifest = Manifest::from_file(&path)?;
            let vars: Variables = vars.into_iter().collect();
            let result = walk_manifest(&manifest, &options, &vars, config);

            for phase in &result.phases {
                println!("[{}]", phase.phase);
                for step in &phase.steps {
                    let mark = if step.will_execute { "+" } else { "-" };
                    println!("  {} {}. {}", mark, step.index + 1, step.name);
                    if let Some(command) = &step.command {
                        println!("      $ {} {}", command, step.args.join(" "));
                    }
                    if let Some(dir) = &step.working_dir {
                        println!("      in {}", dir);
                    }
                    if !step.reason.is_empty() {
                        println!("      ({})", step.reason);
                    }
                }
            }
        }

        ManifestCommands::Deps { path, options } => {
            let manifest = Manifest::from_file(&path)?;
            for dep in manifest.accessor().dependencies_for_options(&options) {
                println!("{} {}", dep.name, dep.version);
            }
        }

        ManifestCommands::Flatten { path, options } => {
            let manifest = Manifest::from_file(&path)?;
            let flat = flatten_manifest(&manifest, &options, &Variables::new(), config);
            print!("{}", serde_yaml::to_string(&flat)?);
        }

        ManifestCommands::Diff { old, new } => {
            let old = Manifest::from_file(&old)?;
            let new = Manifest::from_file(&new)?;
            let diffs = diff_manifests(&old, &new);
            if diffs.is_empty() {
                println!("No differences");
            }
            for diff in diffs {
                println!("{}", diff);
            }
        }
    }

    Ok(())
}

fn print_tree(node: &DependencyNode, indent: usize) {
    let version = if node.is_resolved() {
        node.version.as_str()
    } else {
        "(unresolved)"
    };
    let optional = if node.optional { " [optional]" } else { "" };
    if node.constraint.is_empty() {
        println!("{}{}@{}{}", "  ".repeat(indent), node.package, version, optional);
    } else {
        println!(
            "{}{} {} -> {}{}",
            "  ".repeat(indent),
            node.package,
            node.constraint,
            version,
            optional
        );
    }
    for child in &node.children {
        print_tree(child, indent + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn help_of(cmd: &clap::Command, arg: &str) -> String {
        cmd.get_arguments()
            .find(|a| a.get_id() == arg)
            .and_then(|a| a.get_help())
            .map(|h| h.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_help_matches_behaviour() {
        let cli = Cli::command();
        let search = cli.find_subcommand("search").unwrap();

        let about = search.get_about().unwrap().to_string();
        assert!(!about.contains("description"));
        assert!(help_of(search, "tags").contains("any"));
    }

    #[test]
    fn test_search_tags_are_comma_separated() {
        let cli = Cli::try_parse_from(["hepsw", "search", "--tag", "cern,math"]).unwrap();
        match cli.command {
            Commands::Search { term, tags, .. } => {
                assert_eq!(term, None);
                assert_eq!(tags, vec!["cern", "math"]);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_manifest_subcommands() {
        let cli =
            Cli::try_parse_from(["hepsw", "manifest", "validate", "root.yaml", "--strict"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Manifest(ManifestCommands::Validate { strict: true, .. })
        ));

        let cli = Cli::try_parse_from([
            "hepsw", "-v", "manifest", "walk", "root.yaml", "-o", "python", "-V", "JOBS=8",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Manifest(ManifestCommands::Walk { options, vars, .. }) => {
                assert_eq!(options, vec!["python"]);
                assert_eq!(vars, vec![("JOBS".to_string(), "8".to_string())]);
            }
            _ => panic!("expected manifest walk"),
        }
    }
}
