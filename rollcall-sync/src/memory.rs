//! In-process directory backend.
//!
//! `MemoryDirectory` holds a [`DirectorySnapshot`] behind a mutex and answers
//! every [`DirectoryBackend`] call from it. It records each call in order and
//! can be told to misbehave (truncated listings, policy endpoints that 404
//! until the group propagates, create races, failing adds), which makes it the
//! rehearsal target for the CLI and the fixture for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use rollcall_core::config::GroupPolicy;
use rollcall_core::types::{Identity, IdentityKey, MemberMap, Role};

use crate::backend::{BackendError, DirectoryBackend, GroupKey, GroupRef, GroupSpec, MemberPage};
use crate::snapshot::{DirectorySnapshot, GroupRecord};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    LookupGroup { key: String },
    CreateGroup { name: String },
    UpdateAddress { group: String, address: String },
    ListMembers { group: String, page: usize },
    AddMember { group: String, identity: String },
    RemoveMember { group: String, identity: String },
    UpdateRole { group: String, identity: String, role: Role },
    MailboxStatus { identity: String },
    ApplyPolicy { group: String },
}

impl Call {
    /// Whether the call changes directory state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::CreateGroup { .. }
                | Call::UpdateAddress { .. }
                | Call::AddMember { .. }
                | Call::RemoveMember { .. }
                | Call::UpdateRole { .. }
                | Call::ApplyPolicy { .. }
        )
    }

    /// Group the call targets, if any.
    pub fn group(&self) -> Option<&str> {
        match self {
            Call::CreateGroup { name } => Some(name),
            Call::UpdateAddress { group, .. }
            | Call::ListMembers { group, .. }
            | Call::AddMember { group, .. }
            | Call::RemoveMember { group, .. }
            | Call::UpdateRole { group, .. }
            | Call::ApplyPolicy { group } => Some(group),
            Call::LookupGroup { .. } | Call::MailboxStatus { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Page index whose fetch fails.
    listing_fails_at: Option<usize>,
    /// Remaining `apply_policy` calls that return NotFound.
    policy_not_found: u32,
    /// Remaining NotFound answers per identity for `add_member`.
    add_not_found: HashMap<Identity, u32>,
    failing_adds: HashSet<Identity>,
    /// Next `create_group` loses a race to a concurrent creator.
    create_race: bool,
    mailbox_errors: HashSet<Identity>,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: DirectorySnapshot,
    faults: Faults,
    calls: Vec<Call>,
}

#[derive(Debug)]
pub struct MemoryDirectory {
    name: String,
    key: IdentityKey,
    roles: bool,
    policy: bool,
    eligibility: bool,
    page_size: usize,
    inner: Mutex<Inner>,
}

impl MemoryDirectory {
    pub fn new(name: impl Into<String>, key: IdentityKey) -> Self {
        Self {
            name: name.into(),
            key,
            roles: false,
            policy: false,
            eligibility: false,
            page_size: 200,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A directory-B style backend: roles, policy and mailbox gating enabled.
    pub fn with_all_capabilities(name: impl Into<String>, key: IdentityKey) -> Self {
        Self::new(name, key)
            .with_roles(true)
            .with_policy(true)
            .with_eligibility(true)
    }

    pub fn with_roles(mut self, enabled: bool) -> Self {
        self.roles = enabled;
        self
    }

    pub fn with_policy(mut self, enabled: bool) -> Self {
        self.policy = enabled;
        self
    }

    pub fn with_eligibility(mut self, enabled: bool) -> Self {
        self.eligibility = enabled;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn with_snapshot(self, snapshot: DirectorySnapshot) -> Self {
        self.lock().snapshot = snapshot;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- seeding and inspection ---------------------------------------------

    /// Insert or replace a group with the given members.
    pub fn insert_group(&self, name: &str, address: Option<&str>, members: MemberMap) {
        let mut record = GroupRecord::new(name, address);
        record.members = members;
        self.lock().snapshot.groups.insert(name.to_lowercase(), record);
    }

    pub fn group(&self, name: &str) -> Option<GroupRecord> {
        self.lock().snapshot.groups.get(&name.to_lowercase()).cloned()
    }

    pub fn members(&self, name: &str) -> Option<MemberMap> {
        self.group(name).map(|g| g.members)
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        self.lock().snapshot.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn set_mailbox(&self, identity: &Identity, has_mailbox: bool) {
        self.lock()
            .snapshot
            .mailboxes
            .insert(identity.clone(), has_mailbox);
    }

    // -- fault injection ----------------------------------------------------

    /// Make the fetch of 0-indexed `page` fail.
    pub fn fail_listing_at_page(&self, page: usize) {
        self.lock().faults.listing_fails_at = Some(page);
    }

    /// Answer NotFound to the next `times` policy applications.
    pub fn policy_not_found_times(&self, times: u32) {
        self.lock().faults.policy_not_found = times;
    }

    /// Answer NotFound to the next `times` additions of `identity`.
    pub fn add_not_found_times(&self, identity: &Identity, times: u32) {
        self.lock()
            .faults
            .add_not_found
            .insert(identity.clone(), times);
    }

    /// Make every addition of `identity` fail fatally.
    pub fn fail_add(&self, identity: &Identity) {
        self.lock().faults.failing_adds.insert(identity.clone());
    }

    pub fn fail_mailbox(&self, identity: &Identity) {
        self.lock().faults.mailbox_errors.insert(identity.clone());
    }

    /// The next create sees a concurrent creator win: the group appears and
    /// the call returns Conflict.
    pub fn race_next_create(&self) {
        self.lock().faults.create_race = true;
    }
}

fn group_ref(key: &str, record: &GroupRecord) -> GroupRef {
    GroupRef {
        id: key.to_string(),
        name: record.name.clone(),
        address: record.address.clone(),
    }
}

fn missing_group(group: &GroupRef) -> BackendError {
    BackendError::not_found(format!("group {} does not exist", group.name))
}

#[async_trait]
impl DirectoryBackend for MemoryDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity_key(&self) -> IdentityKey {
        self.key
    }

    fn supports_roles(&self) -> bool {
        self.roles
    }

    fn supports_policy(&self) -> bool {
        self.policy
    }

    fn supports_eligibility(&self) -> bool {
        self.eligibility
    }

    async fn lookup_group(&self, key: GroupKey<'_>) -> Result<Option<GroupRef>, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::LookupGroup {
            key: key.to_string(),
        });
        let groups = &inner.snapshot.groups;
        let found = match key {
            GroupKey::Name(name) => {
                let id = name.to_lowercase();
                groups.get(&id).map(|record| group_ref(&id, record))
            }
            GroupKey::Address(address) => groups
                .iter()
                .find(|(_, record)| {
                    record
                        .address
                        .as_deref()
                        .map(|a| a.eq_ignore_ascii_case(address))
                        .unwrap_or(false)
                })
                .map(|(id, record)| group_ref(id, record)),
        };
        Ok(found)
    }

    async fn create_group(&self, spec: &GroupSpec) -> Result<GroupRef, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::CreateGroup {
            name: spec.name.clone(),
        });

        let id = spec.name.to_lowercase();
        let mut record = GroupRecord::new(&spec.name, Some(&spec.address));
        record.label = spec.label.clone();
        record.description = spec.description.clone();

        if std::mem::take(&mut inner.faults.create_race) {
            inner.snapshot.groups.entry(id).or_insert(record);
            return Err(BackendError::conflict(format!(
                "group {} already exists",
                spec.name
            )));
        }

        let address_taken = inner.snapshot.groups.values().any(|g| {
            g.address
                .as_deref()
                .map(|a| a.eq_ignore_ascii_case(&spec.address))
                .unwrap_or(false)
        });
        if address_taken || inner.snapshot.groups.contains_key(&id) {
            return Err(BackendError::conflict(format!(
                "group {} already exists",
                spec.name
            )));
        }

        let created = group_ref(&id, &record);
        inner.snapshot.groups.insert(id, record);
        Ok(created)
    }

    async fn update_group_address(
        &self,
        group: &GroupRef,
        address: &str,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::UpdateAddress {
            group: group.name.clone(),
            address: address.to_string(),
        });
        let record = inner
            .snapshot
            .groups
            .get_mut(&group.id)
            .ok_or_else(|| missing_group(group))?;
        record.address = Some(address.to_string());
        Ok(())
    }

    async fn list_members(
        &self,
        group: &GroupRef,
        cursor: Option<&str>,
    ) -> Result<MemberPage, BackendError> {
        let page = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| BackendError::fatal(format!("invalid page cursor {c:?}")))?,
            None => 0,
        };

        let mut inner = self.lock();
        inner.calls.push(Call::ListMembers {
            group: group.name.clone(),
            page,
        });
        if inner.faults.listing_fails_at == Some(page) {
            return Err(BackendError::fatal(format!(
                "member page {page} of {} could not be fetched",
                group.name
            )));
        }

        let record = inner
            .snapshot
            .groups
            .get(&group.id)
            .ok_or_else(|| missing_group(group))?;
        let start = page * self.page_size;
        let members: Vec<(Identity, Option<Role>)> = record
            .members
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|(id, role)| (id.clone(), *role))
            .collect();
        let next = (start + self.page_size < record.members.len()).then(|| (page + 1).to_string());

        Ok(MemberPage { members, next })
    }

    async fn add_member(
        &self,
        group: &GroupRef,
        identity: &Identity,
        role: Option<Role>,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::AddMember {
            group: group.name.clone(),
            identity: identity.to_string(),
        });

        if let Some(remaining) = inner.faults.add_not_found.get_mut(identity) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BackendError::not_found(format!(
                    "group {} not visible yet",
                    group.name
                )));
            }
        }
        if inner.faults.failing_adds.contains(identity) {
            return Err(BackendError::fatal(format!("cannot add {identity}")));
        }

        let roles = self.roles;
        let record = inner
            .snapshot
            .groups
            .get_mut(&group.id)
            .ok_or_else(|| missing_group(group))?;
        if record.members.contains_key(identity) {
            return Err(BackendError::conflict(format!(
                "{identity} is already a member of {}",
                group.name
            )));
        }
        record
            .members
            .insert(identity.clone(), if roles { role } else { None });
        Ok(())
    }

    async fn remove_member(
        &self,
        group: &GroupRef,
        identity: &Identity,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::RemoveMember {
            group: group.name.clone(),
            identity: identity.to_string(),
        });
        let record = inner
            .snapshot
            .groups
            .get_mut(&group.id)
            .ok_or_else(|| missing_group(group))?;
        match record.members.remove(identity) {
            Some(_) => Ok(()),
            None => Err(BackendError::not_found(format!(
                "{identity} is not a member of {}",
                group.name
            ))),
        }
    }

    async fn update_member_role(
        &self,
        group: &GroupRef,
        identity: &Identity,
        role: Role,
    ) -> Result<(), BackendError> {
        if !self.roles {
            return Err(BackendError::unsupported("update_member_role"));
        }
        let mut inner = self.lock();
        inner.calls.push(Call::UpdateRole {
            group: group.name.clone(),
            identity: identity.to_string(),
            role,
        });
        let record = inner
            .snapshot
            .groups
            .get_mut(&group.id)
            .ok_or_else(|| missing_group(group))?;
        match record.members.get_mut(identity) {
            Some(existing) => {
                *existing = Some(role);
                Ok(())
            }
            None => Err(BackendError::not_found(format!(
                "{identity} is not a member of {}",
                group.name
            ))),
        }
    }

    async fn mailbox_status(&self, identity: &Identity) -> Result<bool, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(Call::MailboxStatus {
            identity: identity.to_string(),
        });
        if inner.faults.mailbox_errors.contains(identity) {
            return Err(BackendError::fatal(format!("mailbox lookup for {identity} failed")));
        }
        let snapshot = &inner.snapshot;
        Ok(snapshot
            .mailboxes
            .get(identity)
            .copied()
            .unwrap_or(snapshot.default_mailbox))
    }

    async fn apply_policy(
        &self,
        group: &GroupRef,
        policy: &GroupPolicy,
    ) -> Result<(), BackendError> {
        if !self.policy {
            return Err(BackendError::unsupported("apply_policy"));
        }
        let mut inner = self.lock();
        inner.calls.push(Call::ApplyPolicy {
            group: group.name.clone(),
        });
        if inner.faults.policy_not_found > 0 {
            inner.faults.policy_not_found -= 1;
            return Err(BackendError::not_found(format!(
                "settings for {} not found",
                group.name
            )));
        }
        let record = inner
            .snapshot
            .groups
            .get_mut(&group.id)
            .ok_or_else(|| missing_group(group))?;
        record.policy = Some(policy.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(ids: &[&str]) -> MemberMap {
        ids.iter().map(|id| (Identity::from(*id), None)).collect()
    }

    #[tokio::test]
    async fn lookup_by_address_and_name() {
        let dir = MemoryDirectory::new("a", IdentityKey::DistinguishedName);
        dir.insert_group("List-Dept-Sales", Some("list-dept-sales@corp.test"), MemberMap::new());

        let by_address = dir
            .lookup_group(GroupKey::Address("LIST-DEPT-SALES@corp.test"))
            .await
            .unwrap()
            .expect("found by address");
        assert_eq!(by_address.id, "list-dept-sales");

        let by_name = dir
            .lookup_group(GroupKey::Name("list-dept-sales"))
            .await
            .unwrap()
            .expect("found by name");
        assert_eq!(by_name, by_address);

        assert!(dir
            .lookup_group(GroupKey::Name("list-dept-ops"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn listing_pages_through_members() {
        let dir = MemoryDirectory::new("a", IdentityKey::Email).with_page_size(2);
        dir.insert_group("g", None, members(&["a", "b", "c", "d", "e"]));
        let group = dir.lookup_group(GroupKey::Name("g")).await.unwrap().unwrap();

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = dir.list_members(&group, cursor.as_deref()).await.unwrap();
            seen.extend(page.members.into_iter().map(|(id, _)| id.to_string()));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn duplicate_add_is_conflict_and_missing_remove_is_not_found() {
        let dir = MemoryDirectory::new("a", IdentityKey::Email);
        dir.insert_group("g", None, members(&["a"]));
        let group = dir.lookup_group(GroupKey::Name("g")).await.unwrap().unwrap();

        let err = dir
            .add_member(&group, &Identity::from("a"), None)
            .await
            .unwrap_err();
        assert!(err.is(crate::backend::ErrorKind::Conflict));

        let err = dir
            .remove_member(&group, &Identity::from("zz"))
            .await
            .unwrap_err();
        assert!(err.is(crate::backend::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn roles_are_dropped_without_role_support() {
        let dir = MemoryDirectory::new("a", IdentityKey::Email);
        dir.insert_group("g", None, MemberMap::new());
        let group = dir.lookup_group(GroupKey::Name("g")).await.unwrap().unwrap();
        dir.add_member(&group, &Identity::from("m"), Some(Role::Manager))
            .await
            .unwrap();
        assert_eq!(dir.members("g").unwrap()[&Identity::from("m")], None);
    }

    #[tokio::test]
    async fn create_race_leaves_group_and_reports_conflict() {
        let dir = MemoryDirectory::new("b", IdentityKey::Email);
        dir.race_next_create();
        let spec = GroupSpec {
            name: "list-state-tx".into(),
            address: "list-state-tx@corp.test".into(),
            label: "State: TX".into(),
            description: "State: TX distribution group".into(),
        };
        let err = dir.create_group(&spec).await.unwrap_err();
        assert!(err.is(crate::backend::ErrorKind::Conflict));
        assert!(dir.group("list-state-tx").is_some());

        // The race fault is one-shot; the group now exists, so this conflicts too.
        assert!(dir.create_group(&spec).await.is_err());
        assert_eq!(
            dir.calls()
                .iter()
                .filter(|c| matches!(c, Call::CreateGroup { .. }))
                .count(),
            2
        );
    }
}
