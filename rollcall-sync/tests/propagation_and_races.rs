//! Propagation delay, creation races and retry exhaustion through the
//! public reconciler API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rollcall_core::config::NamingConfig;
use rollcall_core::naming::describe_value;
use rollcall_core::types::{CohortKind, GroupDescriptor, Identity, IdentityKey, MemberMap, Role};
use rollcall_sync::backend::{GroupSpec, MemberPage};
use rollcall_sync::memory::{Call, MemoryDirectory};
use rollcall_sync::retry::RetryPolicy;
use rollcall_sync::{BackendError, DirectoryBackend, GroupKey, GroupRef, Reconciler};

fn group(kind: CohortKind, value: &str) -> GroupDescriptor {
    describe_value(kind, value, value, &NamingConfig::default(), "corp.test").expect("descriptor")
}

fn members(ids: &[&str]) -> MemberMap {
    ids.iter()
        .map(|id| (Identity::from(*id), Some(Role::Member)))
        .collect()
}

fn reconciler(dir: &Arc<MemoryDirectory>, max_attempts: u32) -> Reconciler {
    let backend: Arc<dyn DirectoryBackend> = dir.clone();
    Reconciler::new(backend).with_retry(RetryPolicy {
        max_attempts,
        base_delay: Duration::from_secs(1),
        max_jitter: Duration::from_millis(500),
    })
}

fn count(dir: &MemoryDirectory, pred: impl Fn(&Call) -> bool) -> usize {
    dir.calls().iter().filter(|c| pred(c)).count()
}

#[tokio::test(start_paused = true)]
async fn add_retries_while_new_group_propagates() {
    let dir = Arc::new(MemoryDirectory::with_all_capabilities("b", IdentityKey::Email));
    dir.add_not_found_times(&Identity::from("a@corp.test"), 2);

    let outcome = reconciler(&dir, 5)
        .reconcile(&group(CohortKind::Region, "TX"), &members(&["a@corp.test"]))
        .await;

    assert_eq!(outcome.error, None);
    assert_eq!(outcome.added, 1);
    assert_eq!(count(&dir, |c| matches!(c, Call::AddMember { .. })), 3);
}

#[tokio::test(start_paused = true)]
async fn add_to_an_existing_group_does_not_retry_not_found() {
    let dir = Arc::new(MemoryDirectory::with_all_capabilities("b", IdentityKey::Email));
    let descriptor = group(CohortKind::Region, "TX");
    dir.insert_group(&descriptor.name, Some(&descriptor.address), MemberMap::new());
    dir.add_not_found_times(&Identity::from("gone@corp.test"), 2);

    let outcome = reconciler(&dir, 5)
        .reconcile(&descriptor, &members(&["gone@corp.test", "a@corp.test"]))
        .await;

    assert_eq!(outcome.added, 1);
    assert_eq!(outcome.failed, 1);
    assert!(outcome.error.is_some());
    assert_eq!(count(&dir, |c| matches!(c, Call::AddMember { .. })), 2);
}

#[tokio::test(start_paused = true)]
async fn policy_exhaustion_names_attempt_count() {
    let dir = Arc::new(MemoryDirectory::with_all_capabilities("b", IdentityKey::Email));
    dir.policy_not_found_times(100);

    let outcome = reconciler(&dir, 5)
        .reconcile(&group(CohortKind::All, "employees"), &members(&["a@corp.test"]))
        .await;

    assert_eq!(outcome.added, 1, "membership is applied before policy");
    assert!(!outcome.policy_applied);
    let error = outcome.error.expect("policy failure reported");
    assert!(error.contains("after 5 attempts"), "{error}");
    assert_eq!(count(&dir, |c| matches!(c, Call::ApplyPolicy { .. })), 5);
}

#[tokio::test(start_paused = true)]
async fn concurrent_ensure_of_the_same_group_creates_it_once() {
    let dir = Arc::new(MemoryDirectory::with_all_capabilities("b", IdentityKey::Email));
    let descriptor = group(CohortKind::Department, "Finance");

    let first = reconciler(&dir, 3);
    let second = reconciler(&dir, 3);
    let desired = members(&["a@corp.test"]);
    let (one, two) = tokio::join!(
        first.reconcile(&descriptor, &desired),
        second.reconcile(&descriptor, &desired),
    );

    assert_eq!(one.error, None);
    assert_eq!(two.error, None);
    assert!(dir.group("list-dept-finance").is_some());
    assert_eq!(one.added + two.added, 1);
    assert_eq!(dir.snapshot().groups.len(), 1);
}

/// Create always loses a race, yet the winner's group never becomes visible.
struct GhostDirectory;

#[async_trait]
impl DirectoryBackend for GhostDirectory {
    fn name(&self) -> &str {
        "ghost"
    }

    fn identity_key(&self) -> IdentityKey {
        IdentityKey::DistinguishedName
    }

    async fn lookup_group(&self, _key: GroupKey<'_>) -> Result<Option<GroupRef>, BackendError> {
        Ok(None)
    }

    async fn create_group(&self, spec: &GroupSpec) -> Result<GroupRef, BackendError> {
        Err(BackendError::conflict(format!("{} exists", spec.name)))
    }

    async fn list_members(
        &self,
        _group: &GroupRef,
        _cursor: Option<&str>,
    ) -> Result<MemberPage, BackendError> {
        Err(BackendError::fatal("unreachable"))
    }

    async fn add_member(
        &self,
        _group: &GroupRef,
        _identity: &Identity,
        _role: Option<Role>,
    ) -> Result<(), BackendError> {
        Err(BackendError::fatal("unreachable"))
    }

    async fn remove_member(
        &self,
        _group: &GroupRef,
        _identity: &Identity,
    ) -> Result<(), BackendError> {
        Err(BackendError::fatal("unreachable"))
    }
}

#[tokio::test(start_paused = true)]
async fn group_missing_after_conflict_fails_only_that_unit() {
    let outcome = Reconciler::new(Arc::new(GhostDirectory))
        .reconcile(&group(CohortKind::Department, "HR"), &members(&["cn=x"]))
        .await;

    let error = outcome.error.expect("unresolved group is an error");
    assert!(error.contains("could not resolve group list-dept-hr@corp.test"), "{error}");
    assert_eq!(outcome.added, 0);
}
