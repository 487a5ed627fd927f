//! `rollcall sync`: one reconciliation pass against a snapshot state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use rollcall_core::config::{self, RollcallConfig};
use rollcall_core::types::IdentityKey;
use rollcall_sync::population::FilePopulation;
use rollcall_sync::snapshot::{load_state, save_state, DirectoryState};
use rollcall_sync::{pipeline, BackendOutcome, DirectoryBackend, MemoryDirectory, RunReport};
use rollcall_sync::{SyncOutcome, TracingSink};

use crate::{init_tracing, TargetArg};

/// Options shared by `sync` and `plan`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Population file (`users: [...]`, YAML or JSON).
    #[arg(long, value_name = "FILE")]
    pub population: PathBuf,

    /// Directory state file. Created on the first non-dry run.
    #[arg(long, value_name = "FILE")]
    pub state: PathBuf,

    /// Config file. Defaults to `~/.rollcall/config.yaml` when present.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cohort kinds to reconcile (departments, regions, managers, employees, all).
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    pub targets: Vec<TargetArg>,

    /// Emit the run report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Exit non-zero when any group reports an error.
    #[arg(long)]
    pub strict: bool,

    /// Debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Structured JSON logs on stderr.
    #[arg(long)]
    pub log_json: bool,
}

/// Arguments for `rollcall sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub common: RunArgs,

    /// Plan and report without changing either directory.
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let report = self.common.execute(self.dry_run)?;
        if self.common.json {
            print_json(&report)?;
        } else {
            print_table(&report);
        }
        self.common.finish(&report)
    }
}

impl RunArgs {
    /// Load inputs, run the pipeline and persist the state unless dry.
    pub fn execute(&self, force_dry_run: bool) -> Result<RunReport> {
        init_tracing(self.verbose, self.log_json);

        let mut config = self.load_config()?;
        config.dry_run |= force_dry_run;
        if !self.targets.is_empty() {
            config.targets = TargetArg::expand(&self.targets);
        }

        let state = load_state(&self.state)
            .with_context(|| format!("failed to read state '{}'", self.state.display()))?;
        let directory_a = Arc::new(
            MemoryDirectory::new("a", IdentityKey::DistinguishedName)
                .with_snapshot(state.directory_a),
        );
        let directory_b = Arc::new(
            MemoryDirectory::with_all_capabilities("b", IdentityKey::Email)
                .with_snapshot(state.directory_b),
        );
        let a: Arc<dyn DirectoryBackend> = directory_a.clone();
        let b: Arc<dyn DirectoryBackend> = directory_b.clone();
        let backends = vec![a, b];

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start tokio runtime")?;
        let source = FilePopulation::new(&self.population);
        let report = runtime
            .block_on(pipeline::run_with_source(&source, &config, &backends, &TracingSink))
            .with_context(|| {
                format!("failed to load population '{}'", self.population.display())
            })?;

        if !config.dry_run {
            let state = DirectoryState {
                saved_at: Utc::now(),
                directory_a: directory_a.snapshot(),
                directory_b: directory_b.snapshot(),
            };
            save_state(&self.state, &state)
                .with_context(|| format!("failed to write state '{}'", self.state.display()))?;
            tracing::info!(path = %self.state.display(), "state saved");
        }
        Ok(report)
    }

    /// Apply the exit policy.
    pub fn finish(&self, report: &RunReport) -> Result<()> {
        if self.strict && report.has_errors() {
            bail!("{} group(s) reported errors", report.error_count());
        }
        Ok(())
    }

    fn load_config(&self) -> Result<RollcallConfig> {
        match &self.config {
            Some(path) => config::load_from(path)
                .with_context(|| format!("failed to load config '{}'", path.display())),
            None => {
                let home = dirs::home_dir().context("could not determine home directory")?;
                config::load_at(&home).context("failed to load ~/.rollcall/config.yaml")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Users")]
    users: usize,
    #[tabled(rename = "A")]
    a: String,
    #[tabled(rename = "B")]
    b: String,
    #[tabled(rename = "Status")]
    status: &'static str,
}

impl From<&SyncOutcome> for GroupRow {
    fn from(outcome: &SyncOutcome) -> Self {
        Self {
            group: outcome.group.address.clone(),
            label: outcome.group.label.clone(),
            users: outcome.users,
            a: backend_cell(outcome.backend("a")),
            b: backend_cell(outcome.backend("b")),
            status: if outcome.has_errors() { "error" } else { "ok" },
        }
    }
}

fn backend_cell(outcome: Option<&BackendOutcome>) -> String {
    let Some(b) = outcome else {
        return "-".to_string();
    };
    if b.skipped {
        return "skipped".to_string();
    }
    let mut cell = format!("+{}/-{}", b.added, b.removed);
    if b.role_updates > 0 {
        cell.push_str(&format!(" ~{}", b.role_updates));
    }
    if b.group_created {
        cell.push_str(" (new)");
    }
    if b.partial_listing {
        cell.push_str(" (partial)");
    }
    cell
}

pub fn print_json(report: &RunReport) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("failed to serialize run report")?
    );
    Ok(())
}

fn print_table(report: &RunReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let (a_added, a_removed) = report.totals("a");
    let (b_added, b_removed) = report.totals("b");
    println!(
        "{prefix}Rollcall v{} | {} groups | {} skipped | {} errors",
        env!("CARGO_PKG_VERSION"),
        report.outcomes.len(),
        report.skipped.len(),
        report.error_count(),
    );

    if report.outcomes.is_empty() {
        println!("No groups to reconcile.");
    } else {
        let rows: Vec<GroupRow> = report.outcomes.iter().map(GroupRow::from).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    for skipped in &report.skipped {
        println!(
            "{}",
            format!("skipped {} '{}': {}", skipped.kind, skipped.value, skipped.reason).yellow()
        );
    }
    for outcome in report.outcomes.iter().filter(|o| o.has_errors()) {
        let errors = outcome
            .error
            .iter()
            .chain(outcome.backends.iter().filter_map(|b| b.error.as_ref()));
        for error in errors {
            println!("{}", format!("✗ {}: {error}", outcome.group.address).red());
        }
    }

    let totals = format!("a +{a_added}/-{a_removed} | b +{b_added}/-{b_removed}");
    if report.has_errors() {
        println!("{prefix}{}", totals.red());
    } else {
        println!("{prefix}{} {}", "✓".green(), totals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_cell_marks_skips_and_new_groups() {
        assert_eq!(backend_cell(None), "-");
        let skipped = BackendOutcome {
            skipped: true,
            ..BackendOutcome::default()
        };
        assert_eq!(backend_cell(Some(&skipped)), "skipped");
        let created = BackendOutcome {
            added: 3,
            role_updates: 1,
            group_created: true,
            ..BackendOutcome::default()
        };
        assert_eq!(backend_cell(Some(&created)), "+3/-0 ~1 (new)");
    }
}
