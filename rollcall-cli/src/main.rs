//! Rollcall: directory group membership reconciliation CLI.
//!
//! # Usage
//!
//! ```text
//! rollcall sync --population <FILE> --state <FILE> [--config <FILE>] [--dry-run]
//!               [--targets departments,regions,managers,employees|all]
//!               [--json] [--strict] [--verbose] [--log-json]
//! rollcall plan --population <FILE> --state <FILE> [...]
//! rollcall slug <VALUE>
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{plan::PlanArgs, slug::SlugArgs, sync::SyncArgs};
use rollcall_core::types::CohortKind;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "rollcall",
    version,
    about = "Reconcile directory group memberships from a user population",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile every configured cohort against both directories.
    Sync(SyncArgs),

    /// Show what `sync` would change without changing anything.
    Plan(PlanArgs),

    /// Print the canonical group slug for a value.
    Slug(SlugArgs),
}

// ---------------------------------------------------------------------------
// Shared --targets argument
// ---------------------------------------------------------------------------

/// One entry of `--targets`. `all` selects every kind; the all-employees
/// cohort alone is `employees`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArg {
    Every,
    Kind(CohortKind),
}

impl TargetArg {
    /// Expand a `--targets` list into cohort kinds.
    pub fn expand(targets: &[TargetArg]) -> Vec<CohortKind> {
        if targets.contains(&TargetArg::Every) {
            return CohortKind::ORDER.to_vec();
        }
        targets
            .iter()
            .filter_map(|t| match t {
                TargetArg::Kind(kind) => Some(*kind),
                TargetArg::Every => None,
            })
            .collect()
    }
}

impl FromStr for TargetArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::Every);
        }
        s.parse().map(Self::Kind)
    }
}

impl fmt::Display for TargetArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetArg::Every => write!(f, "all"),
            TargetArg::Kind(kind) => write!(f, "{kind}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global subscriber. Logs go to stderr so `--json` output on
/// stdout stays machine-readable.
pub fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Slug(args) => args.run(),
    }
}
