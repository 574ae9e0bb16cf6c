//! idb-storage - artifact storage CLI
//!
//! Thin command-line shell over the storage library. Results are printed as
//! JSON on stdout, logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use idb_storage::xctest::TEST_BUNDLE_EXTENSION;
use idb_storage::{StorageConfig, StorageManager, TargetInfo};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "idb-storage")]
#[command(version)]
#[command(about = "Artifact storage for automation targets", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Storage root, overrides the configuration
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Target identifier
    #[arg(long, global = true)]
    udid: Option<String>,
    /// Target architecture
    #[arg(long, global = true)]
    arch: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dynamic libraries (install, list)
    Dylib {
        #[command(subcommand)]
        command: FileCommands,
    },
    /// Debug symbol bundles (install, list)
    Dsym {
        #[command(subcommand)]
        command: FileCommands,
    },
    /// Frameworks (install, list)
    Framework {
        #[command(subcommand)]
        command: FileCommands,
    },
    /// Applications (install, list)
    App {
        #[command(subcommand)]
        command: FileCommands,
    },
    /// Test bundles and test runs (install, list, describe)
    Xctest {
        #[command(subcommand)]
        command: XctestCommands,
    },
    /// Expand storage placeholders in KEY=VALUE pairs
    Env {
        /// Pairs such as DYLD_INSERT_LIBRARIES=$IDB_DYLIB_ROOT/libFoo.dylib
        pairs: Vec<String>,
    },
    /// Remove every stored artifact for the target
    Clean,
}

#[derive(Subcommand)]
enum FileCommands {
    /// Install an artifact
    Install {
        path: PathBuf,
    },
    /// List installed artifacts
    List,
}

#[derive(Subcommand)]
enum XctestCommands {
    /// Install a bundle, a test run, a directory or a .tar.gz archive
    Install {
        path: PathBuf,
    },
    /// List installed tests
    List,
    /// Describe one installed test
    Describe {
        bundle_id: String,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<String> {
    let manager = open_manager(&cli)?;

    let value = match cli.command {
        Commands::Dylib { command } => match command {
            FileCommands::Install { path } => json!(manager.dylib().save_file(&path)?),
            FileCommands::List => json!(manager.dylib().persisted_files()?),
        },
        Commands::Dsym { command } => match command {
            FileCommands::Install { path } => {
                let bundle = manager.dsym().parser().parse(&path)?;
                json!(manager.dsym().save_bundle(&bundle)?)
            }
            FileCommands::List => json!(manager.dsym().persisted_bundles()?),
        },
        Commands::Framework { command } => match command {
            FileCommands::Install { path } => {
                let bundle = manager.framework().parser().parse(&path)?;
                json!(manager.framework().save_bundle(&bundle)?)
            }
            FileCommands::List => json!(manager.framework().persisted_bundles()?),
        },
        Commands::App { command } => match command {
            FileCommands::Install { path } => {
                let saved = if is_archive(&path) {
                    manager.application().save_bundle_from_archive(&path)?
                } else {
                    manager.application().save_bundle_at(&path)?
                };
                json!(saved)
            }
            FileCommands::List => json!(manager.application().persisted_applications()),
        },
        Commands::Xctest { command } => match command {
            XctestCommands::Install { path } => {
                let xctest = manager.xctest();
                let bundle_id = if is_archive(&path) {
                    xctest.save_bundle_or_test_run_from_archive(&path)?
                } else if path.is_dir() && !has_extension(&path, TEST_BUNDLE_EXTENSION) {
                    xctest.save_bundle_or_test_run_from_base_directory(&path)?
                } else {
                    xctest.save_bundle_or_test_run(&path)?
                };
                json!({ "bundle_id": bundle_id })
            }
            XctestCommands::List => json!(manager.xctest().list_test_descriptors()?),
            XctestCommands::Describe { bundle_id } => {
                json!(manager.xctest().test_descriptor_with_id(&bundle_id)?)
            }
        },
        Commands::Env { pairs } => {
            let environment = parse_pairs(&pairs)?;
            json!(manager.interpolate_environment_replacements(&environment))
        }
        Commands::Clean => {
            manager.clean()?;
            json!({ "cleaned": manager.base_path() })
        }
    };

    Ok(serde_json::to_string_pretty(&value)?)
}

fn open_manager(cli: &Cli) -> Result<StorageManager> {
    let config = match &cli.config {
        Some(path) => StorageConfig::load(path)?,
        None => match &cli.root {
            Some(root) => StorageConfig::new(root.clone()),
            None => StorageConfig::from_defaults()?,
        },
    };
    let mut config = config.apply_env()?;
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }

    let target = match (&cli.udid, &cli.arch, &config.target) {
        (Some(udid), Some(arch), _) => TargetInfo::new(udid.as_str(), arch.as_str()),
        (udid, arch, Some(configured)) => TargetInfo {
            udid: udid.clone().unwrap_or_else(|| configured.udid.clone()),
            name: configured.name.clone(),
            architecture: arch.clone().unwrap_or_else(|| configured.architecture.clone()),
        },
        _ => bail!("no target configured: pass --udid and --arch or set one in the config file"),
    };

    tracing::debug!(root = %config.root.display(), udid = %target.udid, "opening storage");
    StorageManager::manager_for_target(Arc::new(target), &config)
        .with_context(|| format!("Failed to open storage below {}", config.root.display()))
}

fn parse_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => Ok((key.to_string(), value.to_string())),
            None => bail!("expected KEY=VALUE, got '{}'", pair),
        })
        .collect()
}

fn is_archive(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().map(|e| e == extension).unwrap_or(false)
}
