//! Sync outcomes and the reporting sink.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rollcall_core::types::{GroupDescriptor, SkippedCohort};

use crate::reconciler::BackendOutcome;

/// Per-group result across every backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub group: GroupDescriptor,
    /// Users in the cohort.
    pub users: usize,
    pub backends: Vec<BackendOutcome>,
    /// Set when the group's task itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn has_errors(&self) -> bool {
        self.error.is_some() || self.backends.iter().any(|b| b.error.is_some())
    }

    pub fn backend(&self, name: &str) -> Option<&BackendOutcome> {
        self.backends.iter().find(|b| b.backend == name)
    }

    /// One line: `address | users | a +x/-y | b +x/-y`.
    pub fn summary(&self) -> String {
        let mut line = format!("{} | {} users", self.group.address, self.users);
        for b in &self.backends {
            if b.skipped {
                line.push_str(&format!(" | {} skipped", b.backend));
                continue;
            }
            line.push_str(&format!(" | {} +{}/-{}", b.backend, b.added, b.removed));
            if b.role_updates > 0 {
                line.push_str(&format!(" ~{}", b.role_updates));
            }
            if b.error.is_some() {
                line.push_str(" !");
            }
        }
        line
    }
}

/// Receives outcomes as groups finish. Implementations must not block.
pub trait ReportSink: Send + Sync {
    fn record(&self, outcome: &SyncOutcome);

    fn skipped(&self, skipped: &SkippedCohort) {
        tracing::warn!(
            kind = %skipped.kind,
            value = %skipped.value,
            reason = %skipped.reason,
            "cohort skipped"
        );
    }
}

/// Logs one line per group through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn record(&self, outcome: &SyncOutcome) {
        if outcome.has_errors() {
            let errors: Vec<&str> = outcome
                .error
                .iter()
                .chain(outcome.backends.iter().filter_map(|b| b.error.as_ref()))
                .map(String::as_str)
                .collect();
            tracing::error!(
                group = %outcome.group,
                errors = %errors.join("; "),
                "{}",
                outcome.summary()
            );
        } else {
            tracing::info!(group = %outcome.group, "{}", outcome.summary());
        }
    }
}

/// Keeps every outcome in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    outcomes: Mutex<Vec<SyncOutcome>>,
    skipped: Mutex<Vec<SkippedCohort>>,
}

impl CollectingSink {
    pub fn outcomes(&self) -> Vec<SyncOutcome> {
        self.outcomes
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    pub fn skips(&self) -> Vec<SkippedCohort> {
        self.skipped.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ReportSink for CollectingSink {
    fn record(&self, outcome: &SyncOutcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push(outcome.clone());
        }
    }

    fn skipped(&self, skipped: &SkippedCohort) {
        if let Ok(mut all) = self.skipped.lock() {
            all.push(skipped.clone());
        }
    }
}

/// Everything one run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub outcomes: Vec<SyncOutcome>,
    pub skipped: Vec<SkippedCohort>,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        self.outcomes.iter().any(SyncOutcome::has_errors)
    }

    pub fn error_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.has_errors()).count()
    }

    /// Total (added, removed) for one backend.
    pub fn totals(&self, backend: &str) -> (usize, usize) {
        self.outcomes
            .iter()
            .filter_map(|o| o.backend(backend))
            .fold((0, 0), |(a, r), b| (a + b.added, r + b.removed))
    }

    pub fn outcome(&self, group_name: &str) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|o| o.group.name == group_name)
    }
}
