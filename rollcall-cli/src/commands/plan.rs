//! `rollcall plan`: `sync` forced to dry-run, printed per identity.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use rollcall_sync::{BackendOutcome, RunReport};

use super::sync::{print_json, RunArgs};

/// Arguments for `rollcall plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub common: RunArgs,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let report = self.common.execute(true)?;
        if self.common.json {
            print_json(&report)?;
        } else {
            print_plan(&report);
        }
        self.common.finish(&report)
    }
}

fn print_plan(report: &RunReport) {
    let mut changed = 0;
    for outcome in &report.outcomes {
        let lines: Vec<String> = outcome.backends.iter().flat_map(plan_lines).collect();
        if lines.is_empty() {
            continue;
        }

        changed += 1;
        println!("{} ({})", outcome.group.address.bold(), outcome.group.label);
        for line in lines {
            println!("{line}");
        }
    }

    for skipped in &report.skipped {
        println!(
            "{}",
            format!("skipped {} '{}': {}", skipped.kind, skipped.value, skipped.reason).yellow()
        );
    }
    if changed == 0 {
        println!("[dry-run] ✓ nothing to do");
    } else {
        println!("[dry-run] {changed} group(s) would change");
    }
}

fn plan_lines(outcome: &BackendOutcome) -> Vec<String> {
    let planned = &outcome.planned;
    let name = &outcome.backend;
    let adds = planned.add.iter().map(|id| format!("  {name} {} {id}", "+".green()));
    let removes = planned.remove.iter().map(|id| format!("  {name} {} {id}", "-".red()));
    let updates = planned
        .update
        .iter()
        .map(|change| format!("  {name} {} {change}", "~".yellow()));
    adds.chain(removes).chain(updates).collect()
}
