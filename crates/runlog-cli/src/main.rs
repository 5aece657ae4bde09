//! runlog - Experiment run bookkeeping CLI
//!
//! The `runlog` command creates and inspects run directories.
//!
//! ## Commands
//!
//! - `init`: Create a run directory and persist its parameters
//! - `show`: Print a persisted params file with sorted keys
//! - `watches`: Print the entries of a persisted watch file

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use runlog_core::{
    init_tracing, is_git_repo, GitSnapshotSource, RunConfig, RunSession, WatchStore,
};

#[derive(Parser)]
#[command(name = "runlog")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Experiment run bookkeeping", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a run directory and persist its parameters
    ///
    /// Prints the created run directory path on success. The directory is
    /// left ready for the experiment process to write into.
    Init {
        /// Prefix of the run directory name
        #[arg(short, long)]
        name_prefix: String,

        /// Parent directory under which the run directory is created
        #[arg(short, long)]
        base_path: PathBuf,

        /// Snapshot the git state of the base path (branch, revision, diff)
        #[arg(long)]
        git: bool,

        /// Run parameter as key=value (repeatable); values are parsed as
        /// JSON, falling back to plain strings
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Print a persisted params file, re-serialized with sorted keys
    Show {
        /// Path to a params.json file
        path: PathBuf,
    },

    /// Print the entries of a persisted watch file
    Watches {
        /// Path to a watches.json file
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init {
            name_prefix,
            base_path,
            git,
            params,
        } => cmd_init(name_prefix, base_path, git, &params),
        Commands::Show { path } => cmd_show(&path),
        Commands::Watches { path } => cmd_watches(&path),
    }
}

fn cmd_init(name_prefix: String, base_path: PathBuf, git: bool, params: &[String]) -> Result<()> {
    let mut fields = BTreeMap::new();
    for raw in params {
        let (key, value) = parse_param(raw)?;
        fields.insert(key, value);
    }

    if git && !is_git_repo(&base_path) {
        bail!(
            "--git requested but {} is not inside a git repository",
            base_path.display()
        );
    }

    let mut config =
        RunConfig::new(name_prefix, base_path, fields).context("build run config")?;
    let output_path = config.output_path().to_path_buf();

    let git_source = GitSnapshotSource;
    let snapshot: Option<&dyn runlog_core::SnapshotSource> =
        if git { Some(&git_source) } else { None };

    let mut session = RunSession::new(&mut config);
    session.open(snapshot).context("open run session")?;

    info!(event = "cli.run_initialized", run_id = %session.config().run_id());
    println!("{}", output_path.display());
    Ok(())
}

fn cmd_show(path: &Path) -> Result<()> {
    let config = RunConfig::deserialize(path)
        .with_context(|| format!("read params file {}", path.display()))?;
    let content =
        serde_json::to_string_pretty(&config.to_mapping()).context("render params")?;
    println!("{content}");
    Ok(())
}

fn cmd_watches(path: &Path) -> Result<()> {
    let store = WatchStore::load(path)
        .with_context(|| format!("read watch file {}", path.display()))?;
    let content = serde_json::to_string_pretty(store.entries()).context("render watches")?;
    println!("{content}");
    Ok(())
}

/// Split a `key=value` flag into a field name and a JSON value.
///
/// Unset options never reach this point (absent flags are simply absent
/// from the mapping); a value that does not parse as JSON is kept as a
/// plain string, so `-p lr=0.1 -p activation=relu` both work.
fn parse_param(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        bail!("empty parameter name in {raw:?}");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
