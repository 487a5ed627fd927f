//! Backend reconciler: one (group, backend) unit.
//!
//! Each unit walks `ENSURE_GROUP → FETCH_CURRENT → DIFF → APPLY` in strict
//! order. Ensure and apply may fail the unit; a failed unit is reported in
//! its [`BackendOutcome`] and never aborts sibling units.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use rollcall_core::config::GroupPolicy;
use rollcall_core::types::{GroupDescriptor, Identity, MemberMap, Role};

use crate::backend::{BackendError, DirectoryBackend, ErrorKind, GroupKey, GroupRef, GroupSpec};
use crate::diff::{diff, RoleChange};
use crate::eligibility::EligibilityFilter;
use crate::error::SyncError;
use crate::retry::{self, RetryPolicy};

// ---------------------------------------------------------------------------
// Plan and outcome
// ---------------------------------------------------------------------------

/// Operations for one (group, backend) pair. Built once, consumed by apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub group: GroupDescriptor,
    pub backend: String,
    pub to_add: Vec<(Identity, Option<Role>)>,
    pub to_remove: Vec<Identity>,
    pub to_update: Vec<RoleChange>,
    /// Dropped from `to_add` by the eligibility check.
    pub skipped_ineligible: Vec<Identity>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }
}

/// Identities a plan touches, kept on the outcome for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlannedChanges {
    pub add: Vec<String>,
    pub remove: Vec<String>,
    pub update: Vec<String>,
}

impl From<&ReconciliationPlan> for PlannedChanges {
    fn from(plan: &ReconciliationPlan) -> Self {
        Self {
            add: plan.to_add.iter().map(|(id, _)| id.to_string()).collect(),
            remove: plan.to_remove.iter().map(Identity::to_string).collect(),
            update: plan
                .to_update
                .iter()
                .map(|c| match c.to {
                    Some(role) => format!("{} -> {role}", c.identity),
                    None => c.identity.to_string(),
                })
                .collect(),
        }
    }
}

/// Result of one (group, backend) unit. Dry runs fill the same fields with
/// what would have happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendOutcome {
    pub backend: String,
    pub added: usize,
    pub removed: usize,
    pub role_updates: usize,
    pub skipped_ineligible: usize,
    pub failed: usize,
    pub group_created: bool,
    /// The member listing stopped early; `removed` may be understated.
    pub partial_listing: bool,
    pub policy_applied: bool,
    /// Nothing to reconcile; no backend calls were made.
    pub skipped: bool,
    pub planned: PlannedChanges,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendOutcome {
    fn new(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            ..Self::default()
        }
    }
}

enum Resolved {
    Existing(GroupRef),
    Created(GroupRef),
    /// Absent and not created because this is a dry run.
    Missing,
}

impl Resolved {
    fn group(&self) -> Option<&GroupRef> {
        match self {
            Resolved::Existing(g) | Resolved::Created(g) => Some(g),
            Resolved::Missing => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    backend: Arc<dyn DirectoryBackend>,
    eligibility: Option<Arc<EligibilityFilter>>,
    retry: RetryPolicy,
    policy: GroupPolicy,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(backend: Arc<dyn DirectoryBackend>) -> Self {
        Self {
            backend,
            eligibility: None,
            retry: RetryPolicy::default(),
            policy: GroupPolicy::default(),
            dry_run: false,
        }
    }

    /// Gate additions through `filter`. Ignored if the backend does not
    /// declare eligibility support.
    pub fn with_eligibility(mut self, filter: Arc<EligibilityFilter>) -> Self {
        if self.backend.supports_eligibility() {
            self.eligibility = Some(filter);
        }
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: GroupPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn backend(&self) -> &Arc<dyn DirectoryBackend> {
        &self.backend
    }

    fn name(&self) -> &str {
        self.backend.name()
    }

    /// Reconcile `group` towards `desired` (roles included; they are dropped
    /// here when this unit does not sync roles).
    pub async fn reconcile(&self, group: &GroupDescriptor, desired: &MemberMap) -> BackendOutcome {
        let mut outcome = BackendOutcome::new(self.name());

        if desired.is_empty() {
            tracing::warn!(
                group = %group,
                backend = %self.name(),
                "desired membership is empty; skipping"
            );
            outcome.skipped = true;
            return outcome;
        }

        if let Err(err) = self.run(group, desired, &mut outcome).await {
            tracing::error!(
                group = %group,
                backend = %self.name(),
                error = %err,
                "reconcile failed"
            );
            outcome.error = Some(err.to_string());
        }
        outcome
    }

    async fn run(
        &self,
        group: &GroupDescriptor,
        desired: &MemberMap,
        outcome: &mut BackendOutcome,
    ) -> Result<(), SyncError> {
        let resolved = self.ensure_group(group).await?;
        outcome.group_created = matches!(resolved, Resolved::Created(_));

        let current = match &resolved {
            Resolved::Existing(handle) => self.fetch_current(group, handle, outcome).await,
            Resolved::Created(_) | Resolved::Missing => MemberMap::new(),
        };

        let plan = self.plan(group, desired, current).await;
        outcome.planned = PlannedChanges::from(&plan);
        outcome.skipped_ineligible = plan.skipped_ineligible.len();

        let mut errors = Vec::new();
        if let Err(err) = self.apply(resolved.group(), plan, outcome).await {
            errors.push(err);
        }
        if self.backend.supports_policy() && group.kind.applies_policy() {
            if let Err(err) = self.apply_policy(group, resolved.group(), outcome).await {
                errors.push(err);
            }
        }

        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // -- ENSURE_GROUP -------------------------------------------------------

    async fn lookup(&self, key: GroupKey<'_>) -> Result<Option<GroupRef>, SyncError> {
        let operation = format!("lookup group by {key}");
        let found = self
            .retry
            .run(self.name(), &operation, retry::throttled, || {
                self.backend.lookup_group(key)
            })
            .await;
        match found {
            Err(SyncError::Backend { source, .. }) if source.is(ErrorKind::NotFound) => Ok(None),
            other => other,
        }
    }

    /// Resolve the group by address, then by name; create it if neither
    /// matches. A lost creation race counts as success once the winner's
    /// group is visible.
    async fn ensure_group(&self, group: &GroupDescriptor) -> Result<Resolved, SyncError> {
        if let Some(found) = self.lookup(GroupKey::Address(&group.address)).await? {
            return Ok(Resolved::Existing(found));
        }

        if let Some(found) = self.lookup(GroupKey::Name(&group.name)).await? {
            if !found.has_address(&group.address) {
                self.repair_address(group, &found).await;
            }
            return Ok(Resolved::Existing(found));
        }

        if self.dry_run {
            tracing::info!(group = %group, backend = %self.name(), "[dry-run] would create group");
            return Ok(Resolved::Missing);
        }

        match self.backend.create_group(&GroupSpec::from(group)).await {
            Ok(created) => {
                tracing::info!(group = %group, backend = %self.name(), "created group");
                Ok(Resolved::Created(created))
            }
            Err(err) if err.is(ErrorKind::Conflict) => {
                tracing::debug!(
                    group = %group,
                    backend = %self.name(),
                    "group created concurrently; re-fetching"
                );
                if let Some(found) = self.lookup(GroupKey::Address(&group.address)).await? {
                    return Ok(Resolved::Existing(found));
                }
                if let Some(found) = self.lookup(GroupKey::Name(&group.name)).await? {
                    return Ok(Resolved::Existing(found));
                }
                Err(SyncError::GroupUnresolved {
                    backend: self.name().to_string(),
                    address: group.address.clone(),
                })
            }
            Err(err) => Err(SyncError::Backend {
                backend: self.name().to_string(),
                operation: format!("create group {}", group.name),
                source: err,
            }),
        }
    }

    async fn repair_address(&self, group: &GroupDescriptor, found: &GroupRef) {
        if self.dry_run {
            tracing::info!(
                group = %group,
                backend = %self.name(),
                current = found.address.as_deref().unwrap_or(""),
                "[dry-run] would set group address"
            );
            return;
        }
        match self
            .backend
            .update_group_address(found, &group.address)
            .await
        {
            Ok(()) => {
                tracing::info!(group = %group, backend = %self.name(), "repaired group address")
            }
            Err(err) => tracing::warn!(
                group = %group,
                backend = %self.name(),
                error = %err,
                "could not repair group address"
            ),
        }
    }

    // -- FETCH_CURRENT ------------------------------------------------------

    /// Page through the member listing. A failed page ends the listing early
    /// and the unit proceeds with what was fetched.
    async fn fetch_current(
        &self,
        group: &GroupDescriptor,
        handle: &GroupRef,
        outcome: &mut BackendOutcome,
    ) -> MemberMap {
        let mut current = MemberMap::new();
        let mut cursor: Option<String> = None;
        let mut page = 0usize;

        loop {
            let operation = format!("list members of {} (page {page})", group.name);
            let fetched = self
                .retry
                .run(self.name(), &operation, retry::throttled, || {
                    self.backend.list_members(handle, cursor.as_deref())
                })
                .await;

            match fetched {
                Ok(members) => {
                    current.extend(members.members);
                    match members.next {
                        Some(next) => {
                            cursor = Some(next);
                            page += 1;
                        }
                        None => break,
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        group = %group,
                        backend = %self.name(),
                        page,
                        fetched = current.len(),
                        error = %err,
                        "member listing incomplete; continuing with partial view"
                    );
                    outcome.partial_listing = true;
                    break;
                }
            }
        }
        current
    }

    // -- DIFF ---------------------------------------------------------------

    /// Diff desired against current and drop ineligible additions.
    pub async fn plan(
        &self,
        group: &GroupDescriptor,
        desired: &MemberMap,
        current: MemberMap,
    ) -> ReconciliationPlan {
        let with_roles = self.backend.supports_roles() && group.kind.uses_roles();
        let (desired, current) = if with_roles {
            (desired.clone(), current)
        } else {
            (strip_roles(desired), strip_roles(&current))
        };

        let changes = diff(&desired, &current);
        let mut to_add = changes.to_add;
        let mut skipped_ineligible = Vec::new();

        if let Some(filter) = &self.eligibility {
            if !to_add.is_empty() {
                let candidates = to_add.iter().map(|(id, _)| id.clone()).collect();
                let eligible: HashSet<Identity> =
                    filter.filter_eligible(candidates).await.into_iter().collect();
                to_add.retain(|(id, _)| {
                    let keep = eligible.contains(id);
                    if !keep {
                        tracing::debug!(
                            group = %group,
                            backend = %self.name(),
                            identity = %id,
                            "skipping ineligible member"
                        );
                        skipped_ineligible.push(id.clone());
                    }
                    keep
                });
            }
        }

        ReconciliationPlan {
            group: group.clone(),
            backend: self.name().to_string(),
            to_add,
            to_remove: changes.to_remove,
            to_update: changes.to_update,
            skipped_ineligible,
        }
    }

    // -- APPLY --------------------------------------------------------------

    /// Additions, then role updates, then removals. Dry runs log the plan and
    /// report its sizes without issuing calls.
    async fn apply(
        &self,
        handle: Option<&GroupRef>,
        plan: ReconciliationPlan,
        outcome: &mut BackendOutcome,
    ) -> Result<(), SyncError> {
        let group = &plan.group;
        tracing::debug!(
            group = %group,
            backend = %plan.backend,
            add = plan.to_add.len(),
            remove = plan.to_remove.len(),
            update = plan.to_update.len(),
            ineligible = plan.skipped_ineligible.len(),
            "plan"
        );

        let handle = match handle {
            Some(handle) if !self.dry_run => handle,
            _ => {
                for (id, role) in &plan.to_add {
                    tracing::info!(
                        group = %group,
                        backend = %plan.backend,
                        identity = %id,
                        role = ?role,
                        "[dry-run] would add"
                    );
                }
                for change in &plan.to_update {
                    tracing::info!(
                        group = %group,
                        backend = %plan.backend,
                        identity = %change.identity,
                        role = ?change.to,
                        "[dry-run] would update role"
                    );
                }
                for id in &plan.to_remove {
                    tracing::info!(
                        group = %group,
                        backend = %plan.backend,
                        identity = %id,
                        "[dry-run] would remove"
                    );
                }
                outcome.added = plan.to_add.len();
                outcome.removed = plan.to_remove.len();
                outcome.role_updates = plan
                    .to_update
                    .iter()
                    .filter(|c| c.to.is_some())
                    .count();
                return Ok(());
            }
        };

        let mut first_failure: Option<SyncError> = None;
        let mut record_failure = |err: SyncError, outcome: &mut BackendOutcome| {
            tracing::error!(
                group = %group,
                backend = %plan.backend,
                error = %err,
                "member operation failed"
            );
            outcome.failed += 1;
            first_failure.get_or_insert(err);
        };

        // NotFound on add means "not visible yet" only for a group created
        // this run. Against an existing group it is permanent.
        let add_retryable: fn(&BackendError) -> bool = if outcome.group_created {
            retry::propagation
        } else {
            retry::throttled
        };
        for (id, role) in &plan.to_add {
            let operation = format!("add {id} to {}", group.name);
            let result = self
                .retry
                .run(self.name(), &operation, add_retryable, || {
                    self.backend.add_member(handle, id, *role)
                })
                .await;
            match result {
                Ok(()) => {
                    tracing::debug!(group = %group, identity = %id, "added");
                    outcome.added += 1;
                }
                Err(err) if is_kind(&err, ErrorKind::Conflict) => {
                    tracing::debug!(group = %group, identity = %id, "already a member");
                    // Present but unlisted: its role was never compared.
                    let Some(role) = *role else {
                        continue;
                    };
                    let operation = format!("set {id} to {role} in {}", group.name);
                    let result = self
                        .retry
                        .run(self.name(), &operation, retry::throttled, || {
                            self.backend.update_member_role(handle, id, role)
                        })
                        .await;
                    match result {
                        Ok(()) => {
                            tracing::debug!(
                                group = %group,
                                identity = %id,
                                role = %role,
                                "role asserted"
                            );
                        }
                        Err(err) => record_failure(err, outcome),
                    }
                }
                Err(err) => record_failure(err, outcome),
            }
        }

        for change in &plan.to_update {
            let Some(role) = change.to else {
                continue;
            };
            let id = &change.identity;
            let operation = format!("set {id} to {role} in {}", group.name);
            let result = self
                .retry
                .run(self.name(), &operation, retry::throttled, || {
                    self.backend.update_member_role(handle, id, role)
                })
                .await;
            match result {
                Ok(()) => {
                    tracing::debug!(group = %group, identity = %id, role = %role, "role updated");
                    outcome.role_updates += 1;
                }
                Err(err) => record_failure(err, outcome),
            }
        }

        for id in &plan.to_remove {
            let operation = format!("remove {id} from {}", group.name);
            let result = self
                .retry
                .run(self.name(), &operation, retry::throttled, || {
                    self.backend.remove_member(handle, id)
                })
                .await;
            match result {
                Ok(()) => {
                    tracing::debug!(group = %group, identity = %id, "removed");
                    outcome.removed += 1;
                }
                Err(err) if is_kind(&err, ErrorKind::NotFound) => {
                    tracing::debug!(group = %group, identity = %id, "already removed");
                    outcome.removed += 1;
                }
                Err(err) => record_failure(err, outcome),
            }
        }

        match first_failure {
            None => Ok(()),
            Some(first) => Err(SyncError::MemberFailures {
                backend: plan.backend.clone(),
                failed: outcome.failed,
                first: first.to_string(),
            }),
        }
    }

    async fn apply_policy(
        &self,
        group: &GroupDescriptor,
        handle: Option<&GroupRef>,
        outcome: &mut BackendOutcome,
    ) -> Result<(), SyncError> {
        let handle = match handle {
            Some(handle) if !self.dry_run => handle,
            _ => {
                tracing::info!(
                    group = %group,
                    backend = %self.name(),
                    "[dry-run] would apply group policy"
                );
                return Ok(());
            }
        };

        let operation = format!("apply policy to {}", group.name);
        self.retry
            .run(self.name(), &operation, retry::propagation, || {
                self.backend.apply_policy(handle, &self.policy)
            })
            .await?;
        tracing::debug!(group = %group, backend = %self.name(), "policy applied");
        outcome.policy_applied = true;
        Ok(())
    }
}

fn strip_roles(members: &MemberMap) -> MemberMap {
    members.keys().map(|id| (id.clone(), None)).collect()
}

fn is_kind(err: &SyncError, kind: ErrorKind) -> bool {
    matches!(err, SyncError::Backend { source, .. } if source.is(kind))
}
