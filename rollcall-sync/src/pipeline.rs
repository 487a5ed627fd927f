//! Run pipeline: population → cohorts → groups → per-backend reconciliation.
//!
//! Cohort kinds run one after another in the configured order. Within a kind,
//! one task per cohort runs on a bounded pool (the singleton "all" cohort gets
//! its own pool). Each task reconciles its group against every backend in
//! turn, so one backend's failure never stops the other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use rollcall_core::cohort::CohortBuilder;
use rollcall_core::config::RollcallConfig;
use rollcall_core::naming::describe;
use rollcall_core::types::{Cohort, GroupDescriptor, SkippedCohort, UserRecord};

use crate::backend::DirectoryBackend;
use crate::eligibility::EligibilityFilter;
use crate::error::SyncError;
use crate::population::PopulationSource;
use crate::reconciler::Reconciler;
use crate::report::{ReportSink, RunReport, SyncOutcome};
use crate::retry::RetryPolicy;
use crate::scheduler::TaskPool;

/// Build the run-scoped reconcilers: one per backend, each with its own
/// eligibility cache when the backend gates additions.
fn reconcilers(config: &RollcallConfig, backends: &[Arc<dyn DirectoryBackend>]) -> Vec<Reconciler> {
    let retry = RetryPolicy::from(&config.retry);
    backends
        .iter()
        .map(|backend| {
            let mut reconciler = Reconciler::new(Arc::clone(backend))
                .with_retry(retry.clone())
                .with_policy(config.policy.clone())
                .dry_run(config.dry_run);
            if backend.supports_eligibility() {
                let limit = config.concurrency.eligibility;
                let filter = EligibilityFilter::new(Arc::clone(backend), limit);
                reconciler = reconciler.with_eligibility(Arc::new(filter));
            }
            reconciler
        })
        .collect()
}

/// Fetch the population from `source` and run.
pub async fn run_with_source(
    source: &dyn PopulationSource,
    config: &RollcallConfig,
    backends: &[Arc<dyn DirectoryBackend>],
    sink: &dyn ReportSink,
) -> Result<RunReport, SyncError> {
    let users = source.fetch_users(&config.population).await?;
    Ok(run(&users, config, backends, sink).await)
}

/// Reconcile every configured cohort kind against every backend.
///
/// Always completes: per-group failures are captured in the report.
pub async fn run(
    users: &[UserRecord],
    config: &RollcallConfig,
    backends: &[Arc<dyn DirectoryBackend>],
    sink: &dyn ReportSink,
) -> RunReport {
    let started_at = Utc::now();
    let reconcilers = Arc::new(reconcilers(config, backends));
    let builder = CohortBuilder::new(users);
    let mut report = RunReport {
        started_at,
        finished_at: started_at,
        dry_run: config.dry_run,
        outcomes: Vec::new(),
        skipped: Vec::new(),
    };

    tracing::info!(
        users = users.len(),
        backends = backends.len(),
        dry_run = config.dry_run,
        "sync started"
    );

    for kind in config.ordered_targets() {
        let mut units: Vec<(GroupDescriptor, Cohort)> = Vec::new();
        for built in builder.build(kind) {
            let described = built.and_then(|cohort| {
                describe(&cohort, &config.naming, &config.email_domain).map(|d| (d, cohort))
            });
            match described {
                Ok(unit) => units.push(unit),
                Err(skipped) => skip(&mut report, sink, skipped),
            }
        }
        let units = merge_by_address(units);

        let pool = TaskPool::new(kind.to_string(), config.concurrency.for_kind(kind));
        tracing::info!(
            kind = %kind,
            groups = units.len(),
            workers = pool.limit(),
            "reconciling cohorts"
        );

        let headers: Vec<(GroupDescriptor, usize)> =
            units.iter().map(|(d, c)| (d.clone(), c.len())).collect();
        let tasks = units
            .into_iter()
            .map(|(descriptor, cohort)| {
                let reconcilers = Arc::clone(&reconcilers);
                (descriptor.address.clone(), reconcile_group(reconcilers, descriptor, cohort))
            })
            .collect();

        for ((group, users), result) in headers.into_iter().zip(pool.run(tasks).await) {
            let outcome = result.unwrap_or_else(|err| SyncOutcome {
                group,
                users,
                backends: Vec::new(),
                error: Some(err.to_string()),
            });
            sink.record(&outcome);
            report.outcomes.push(outcome);
        }
    }

    report.finished_at = Utc::now();
    tracing::info!(
        groups = report.outcomes.len(),
        skipped = report.skipped.len(),
        errors = report.error_count(),
        "sync finished"
    );
    report
}

async fn reconcile_group(
    reconcilers: Arc<Vec<Reconciler>>,
    descriptor: GroupDescriptor,
    cohort: Cohort,
) -> SyncOutcome {
    let mut backends = Vec::with_capacity(reconcilers.len());
    for reconciler in reconcilers.iter() {
        let desired = cohort.desired(reconciler.backend().identity_key(), true);
        backends.push(reconciler.reconcile(&descriptor, &desired).await);
    }
    SyncOutcome {
        group: descriptor,
        users: cohort.len(),
        backends,
        error: None,
    }
}

/// Values that slug alike ("R&D" and "RD") name the same group. Fold them
/// into the first cohort so each group is reconciled once per run.
fn merge_by_address(units: Vec<(GroupDescriptor, Cohort)>) -> Vec<(GroupDescriptor, Cohort)> {
    let mut merged: Vec<(GroupDescriptor, Cohort)> = Vec::with_capacity(units.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for (descriptor, cohort) in units {
        match index.get(&descriptor.address) {
            Some(&at) => {
                tracing::warn!(
                    group = %descriptor,
                    value = %cohort.value,
                    merged_into = %merged[at].1.value,
                    "cohort values share a group; merging"
                );
                merged[at].1.absorb(cohort);
            }
            None => {
                index.insert(descriptor.address.clone(), merged.len());
                merged.push((descriptor, cohort));
            }
        }
    }
    merged
}

fn skip(report: &mut RunReport, sink: &dyn ReportSink, skipped: SkippedCohort) {
    sink.skipped(&skipped);
    report.skipped.push(skipped);
}
