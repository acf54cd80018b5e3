// src/main.rs

use anyhow::{Context, Result};
use caskade::registry;
use caskade::version::VersionConstraint;
use caskade::{Config, Engine, InstallStatus, PackageRequest, Platform, Registry, ZapPolicy};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "caskade")]
#[command(author, version, about = "Manifest-driven package installer with verified, idempotent installs", long_about = None)]
struct Cli {
    /// Registry database path
    #[arg(short, long, global = true, env = "CASKADE_DB")]
    db_path: Option<PathBuf>,

    /// Directory of *.json package manifests
    #[arg(short, long, global = true, env = "CASKADE_MANIFESTS")]
    manifests: Option<PathBuf>,

    /// Install prefix holding bin/ and Applications/
    #[arg(short, long, global = true, env = "CASKADE_PREFIX")]
    prefix: Option<PathBuf>,

    /// Verified artifact cache
    #[arg(long, global = true, env = "CASKADE_CACHE")]
    cache_dir: Option<PathBuf>,

    /// Target platform instead of the host, e.g. darwin/arm64@14.2
    #[arg(long, global = true, env = "CASKADE_PLATFORM")]
    platform: Option<Platform>,

    /// What upgrades do with zap paths the new version drops
    #[arg(long, global = true, env = "CASKADE_ZAP_POLICY")]
    zap_policy: Option<ZapPolicy>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the registry database and manifest directory
    Init,
    /// Install one or more packages
    Install {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
        /// Version or requirement (e.g. 2.29.5, ^2.29) applied to every name
        #[arg(long)]
        version: Option<VersionConstraint>,
    },
    /// Remove an installed package
    Uninstall {
        /// Package name to remove
        name: String,
        /// Also remove user data and caches the package declares
        #[arg(long)]
        zap: bool,
    },
    /// Upgrade an installed package to its newest manifest version
    Upgrade {
        /// Package name to upgrade
        name: String,
    },
    /// List installed packages
    List,
    /// Show manifest and install details for a package
    Info {
        /// Package name
        name: String,
    },
    /// List installed packages with newer manifests
    Outdated,
    /// Show changeset history
    History {
        /// Only changesets for this package
        name: Option<String>,
    },
    /// Run an installed package's smoke tests
    Test {
        /// Package name
        name: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Exit code of the first library error in the chain, 1 otherwise
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<caskade::Error>())
        .map(caskade::Error::exit_code)
        .unwrap_or(1)
}

fn build_config(cli: &Cli) -> Config {
    let mut config = Config::default();
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
        if let Some(parent) = db_path.parent() {
            config.state_dir = parent.to_path_buf();
        }
    }
    if let Some(manifests) = &cli.manifests {
        config.manifest_dir = manifests.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.prefix = prefix.clone();
    }
    if let Some(cache_dir) = &cli.cache_dir {
        config.cache_dir = cache_dir.clone();
    }
    config.platform = cli.platform.clone();
    if let Some(policy) = cli.zap_policy {
        config.zap_policy = policy;
    }
    config
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Init => {
            info!("Initializing caskade at: {}", config.db_path.display());
            registry::init(&config.db_path)?;
            for dir in [&config.manifest_dir, &config.prefix] {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            println!("Registry initialized at: {}", config.db_path.display());
            println!("Manifests: {}", config.manifest_dir.display());
            println!("Prefix: {}", config.prefix.display());
            Ok(())
        }
        Commands::Install { names, version } => {
            let engine = open_engine(config)?;
            let requests: Vec<PackageRequest> = names
                .iter()
                .map(|name| PackageRequest::new(name).with_version(version.clone().unwrap_or_default()))
                .collect();

            for outcome in engine.install(&requests)? {
                let record = &outcome.record;
                match outcome.status {
                    InstallStatus::Unchanged => {
                        println!("{} {} is already installed", record.name, record.version)
                    }
                    InstallStatus::Upgraded { from } => {
                        println!("Upgraded {} {} -> {}", record.name, from, record.version)
                    }
                    InstallStatus::Installed | InstallStatus::Reinstalled => {
                        println!("Installed {} {}", record.name, record.version)
                    }
                }
                println!("  Files: {}", record.files.len());
            }
            Ok(())
        }
        Commands::Uninstall { name, zap } => {
            let engine = open_engine(config)?;
            if zap {
                let report = engine.zap(&name)?;
                println!("Zapped {} {}", report.record.name, report.record.version);
                for path in &report.removed {
                    println!("  Removed: {}", path.display());
                }
                for failure in &report.failures {
                    println!("  Could not remove {}: {}", failure.path, failure.reason);
                }
            } else {
                let record = engine.uninstall(&name)?;
                println!("Uninstalled {} {}", record.name, record.version);
                println!("  Files removed: {}", record.files.len());
            }
            Ok(())
        }
        Commands::Upgrade { name } => {
            let engine = open_engine(config)?;
            let outcome = engine.upgrade(&name)?;
            match outcome.status {
                InstallStatus::Upgraded { from } => println!(
                    "Upgraded {} {} -> {}",
                    outcome.record.name, from, outcome.record.version
                ),
                _ => println!(
                    "{} {} is up to date",
                    outcome.record.name, outcome.record.version
                ),
            }
            Ok(())
        }
        Commands::List => {
            let engine = open_engine(config)?;
            let records = engine.registry().list()?;

            if records.is_empty() {
                println!("No packages installed.");
            } else {
                println!("Installed packages:");
                for record in &records {
                    print!("  {} {}", record.name, record.version);
                    if let Some(manifest) = engine.manifests().newest(&record.name) {
                        print!(" ({})", manifest.kind.as_str());
                    }
                    println!();
                }
                println!("\nTotal: {} package(s)", records.len());
            }
            Ok(())
        }
        Commands::Info { name } => {
            let engine = open_engine(config)?;
            let installed = engine.registry().get(&name)?;
            let manifest = engine.manifests().newest(&name);

            if manifest.is_none() && installed.is_none() {
                return Err(caskade::Error::from(caskade::ResolutionError::NotFound(name)).into());
            }

            println!("{}", name);
            if let Some(manifest) = manifest {
                println!("  Latest: {} ({})", manifest.version, manifest.kind.as_str());
                if let Some(description) = &manifest.description {
                    println!("  Description: {}", description);
                }
                if let Some(homepage) = &manifest.homepage {
                    println!("  Homepage: {}", homepage);
                }
                let platforms: Vec<String> =
                    manifest.variants.iter().map(|v| v.platform.to_string()).collect();
                println!("  Platforms: {}", platforms.join(", "));
                if !manifest.conflicts_with.is_empty() {
                    println!("  Conflicts with: {}", manifest.conflicts_with.join(", "));
                }
                if let Some(minimum) = manifest.minimum_os {
                    println!("  Requires: {}", minimum);
                }
            }
            match installed {
                Some(record) => {
                    println!("  Installed: {} at {}", record.version, record.installed_at);
                    println!("  Source: {}", record.source_url);
                    for file in &record.files {
                        println!("    {}", file);
                    }
                }
                None => println!("  Not installed"),
            }
            Ok(())
        }
        Commands::Outdated => {
            let engine = open_engine(config)?;
            let outdated = engine.outdated()?;

            if outdated.is_empty() {
                println!("All packages are up to date.");
            } else {
                for entry in &outdated {
                    println!("  {} {} -> {}", entry.name, entry.installed, entry.available);
                }
            }
            Ok(())
        }
        Commands::History { name } => {
            let store = Registry::open(&config.db_path)?;
            let changesets = match &name {
                Some(name) => store.history_for(name)?,
                None => store.history()?,
            };

            if changesets.is_empty() {
                println!("No changeset history.");
            } else {
                println!("Changeset history:");
                for changeset in &changesets {
                    let versions = match (&changeset.from_version, &changeset.to_version) {
                        (Some(from), Some(to)) => format!("{} -> {}", from, to),
                        (None, Some(to)) => to.clone(),
                        (Some(from), None) => from.clone(),
                        (None, None) => String::new(),
                    };
                    println!(
                        "  [{}] {} - {} {} {}",
                        changeset.id.unwrap_or_default(),
                        changeset.committed_at.as_deref().unwrap_or("unknown"),
                        changeset.operation,
                        changeset.package,
                        versions
                    );
                }
                println!("\nTotal: {} changeset(s)", changesets.len());
            }
            Ok(())
        }
        Commands::Test { name } => {
            let engine = open_engine(config)?;
            let count = engine.test(&name)?;
            if count == 0 {
                println!("{} declares no tests.", name);
            } else {
                println!("{}: {} test(s) passed", name, count);
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "caskade", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn open_engine(config: Config) -> Result<Engine> {
    let db_path = config.db_path.clone();
    Engine::open(config).with_context(|| format!("Failed to open caskade state at {}", db_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use caskade::platform::{Arch, Os};

    #[test]
    fn test_global_options_override_defaults() {
        let cli = Cli::try_parse_from([
            "caskade",
            "install",
            "coder",
            "--db-path",
            "/tmp/sandbox/state/caskade.db",
            "--prefix",
            "/tmp/sandbox/prefix",
            "--platform",
            "darwin/arm64@14.2",
        ])
        .unwrap();

        let config = build_config(&cli);
        assert_eq!(config.db_path, PathBuf::from("/tmp/sandbox/state/caskade.db"));
        assert_eq!(config.state_dir, PathBuf::from("/tmp/sandbox/state"));
        assert_eq!(config.prefix, PathBuf::from("/tmp/sandbox/prefix"));

        let platform = config.platform.unwrap();
        assert_eq!((platform.os, platform.arch), (Os::Darwin, Arch::Arm64));
    }

    #[test]
    fn test_install_requires_a_name() {
        assert!(Cli::try_parse_from(["caskade", "install"]).is_err());

        let cli = Cli::try_parse_from(["caskade", "install", "coder", "coder@1", "--version", "^2.29"])
            .unwrap();
        match cli.command {
            Some(Commands::Install { names, version }) => {
                assert_eq!(names, vec!["coder", "coder@1"]);
                assert!(matches!(version, Some(VersionConstraint::Req(_))));
            }
            _ => panic!("expected install command"),
        }
    }

    #[test]
    fn test_history_and_test_commands() {
        let cli = Cli::try_parse_from(["caskade", "history"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::History { name: None })));

        let cli = Cli::try_parse_from(["caskade", "history", "coder"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::History { name: Some(ref n) }) if n == "coder"));

        let cli = Cli::try_parse_from(["caskade", "test", "coder@1"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Test { ref name }) if name == "coder@1"));
        assert!(Cli::try_parse_from(["caskade", "test"]).is_err());
    }

    #[test]
    fn test_invalid_platform_is_rejected() {
        assert!(Cli::try_parse_from(["caskade", "list", "--platform", "windows/x86"]).is_err());
    }

    #[test]
    fn test_exit_code_follows_root_cause() {
        let err = anyhow::Error::from(caskade::Error::from(caskade::ResolutionError::NotFound(
            "coder".to_string(),
        )))
        .context("Failed to install");
        assert_eq!(exit_code(&err), 3);

        assert_eq!(exit_code(&anyhow::anyhow!("plain failure")), 1);
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
