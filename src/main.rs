//! mergepw binary entry point.
//!
//! Parses the command line, sets up logging, merges the two account
//! directories and writes the result. Nothing is written on failure.
//!
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mergepw::config::{FileConfig, Overrides, Settings};

/// Merge selected users and groups of SDIR into DDIR and write the result to MDIR.
///
/// Regexes are matched against whole names. Group regexes may match system
/// groups when prefixed with ":", e.g. ":sudo" selects all sudoers. ".*"
/// matches all, "" matches none. All regexes default to none, except that
/// --sur defaults to all when --sgr is empty too.
#[derive(Debug, Parser)]
#[command(name = "mergepw", version)]
struct Cli {
    /// Source directory with passwd, group and optionally shadow, gshadow
    sdir: PathBuf,
    /// Destination directory with passwd, group and optionally shadow, gshadow
    ddir: PathBuf,
    /// Directory that receives the merged tables
    mdir: PathBuf,

    /// Regex of source user accounts to import
    #[arg(long, env = "MERGEPW_SUR")]
    sur: Option<String>,
    /// Regex of source groups; their member users are also imported
    #[arg(long, env = "MERGEPW_SGR")]
    sgr: Option<String>,
    /// Regex of destination user accounts to preserve
    #[arg(long, env = "MERGEPW_DUR")]
    dur: Option<String>,
    /// Regex of destination groups; their member users are also preserved
    #[arg(long, env = "MERGEPW_DGR")]
    dgr: Option<String>,

    /// Lowest uid of a regular user
    #[arg(long)]
    uid_min: Option<u32>,
    /// Highest uid of a regular user
    #[arg(long)]
    uid_max: Option<u32>,
    /// Lowest gid of a regular group
    #[arg(long)]
    gid_min: Option<u32>,
    /// Highest gid of a regular group
    #[arg(long)]
    gid_max: Option<u32>,

    /// Read defaults from a `key = value` file
    #[arg(long, env = "MERGEPW_CONFIG")]
    config: Option<PathBuf>,

    /// Only show warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            sur: self.sur.clone(),
            sgr: self.sgr.clone(),
            dur: self.dur.clone(),
            dgr: self.dgr.clone(),
            uid_min: self.uid_min,
            uid_max: self.uid_max,
            gid_min: self.gid_min,
            gid_max: self.gid_max,
            quiet: self.quiet,
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over the quiet flag.
fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    let unknown_keys = file.unknown_keys.clone();
    let settings = Settings::resolve(cli.overrides(), file)?;
    init_tracing(settings.quiet);
    for key in unknown_keys {
        tracing::warn!("ignoring unknown config key `{key}`");
    }

    let outcome = mergepw::merge_dirs(&cli.sdir, &cli.ddir, &cli.mdir, &settings.options)
        .with_context(|| {
            format!(
                "failed to merge {} into {}",
                cli.sdir.display(),
                cli.ddir.display()
            )
        })?;
    tracing::info!(
        users = outcome.database.users.len(),
        groups = outcome.database.groups.len(),
        "wrote merged tables to {}",
        cli.mdir.display()
    );
    if outcome.report.has_warnings() {
        tracing::warn!(
            gid_conflicts = outcome.report.gid_conflicts.len(),
            orphaned_users = outcome.report.missing_primary_groups.len(),
            "merge finished with warnings"
        );
    }
    Ok(())
}

/// Program entry point: run the merge and report any top-level error to stderr.
fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mergepw: {err:#}");
            ExitCode::FAILURE
        }
    }
}
