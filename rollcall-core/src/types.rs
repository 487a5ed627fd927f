//! Domain types for rollcall.
//!
//! Everything here is run-scoped: built fresh from the population and from
//! remote listings at the start of a pass, and dropped at the end. Only the
//! directories themselves persist state between runs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Lower-case and trim a raw distinguished name or email.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A normalized, comparable member key.
///
/// Construction always normalizes, so two identities are equal iff their
/// normalized forms are equal. Set operations never see raw strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    /// Like [`Identity::new`] but rejects values that normalize to empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let id = Self::new(raw);
        if id.0.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

/// Which user attribute a backend keys its members by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    DistinguishedName,
    Email,
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::DistinguishedName => write!(f, "dn"),
            IdentityKey::Email => write!(f, "email"),
        }
    }
}

/// Member role tag inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Member,
    Manager,
}

impl Role {
    /// Case-insensitive parse of a backend role string. Unknown roles
    /// (e.g. `OWNER`) yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MEMBER" => Some(Role::Member),
            "MANAGER" => Some(Role::Manager),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Member => write!(f, "MEMBER"),
            Role::Manager => write!(f, "MANAGER"),
        }
    }
}

/// Identity → optional role. Ordered so plans and logs are deterministic.
pub type MemberMap = BTreeMap<Identity, Option<Role>>;

// ---------------------------------------------------------------------------
// Population
// ---------------------------------------------------------------------------

/// One user from the population source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Distinguished name in directory A.
    pub dn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub region: String,
    /// DN of this user's manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
    #[serde(default)]
    pub direct_reports: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl UserRecord {
    /// The normalized identity for a backend's key, if the user has one.
    pub fn identity(&self, key: IdentityKey) -> Option<Identity> {
        match key {
            IdentityKey::DistinguishedName => Identity::parse(&self.dn),
            IdentityKey::Email => self.email.as_deref().and_then(Identity::parse),
        }
    }

    pub fn has_direct_reports(&self) -> bool {
        self.direct_reports.iter().any(|dn| !dn.trim().is_empty())
    }

    pub fn has_mail(&self) -> bool {
        self.email
            .as_deref()
            .map(|e| !e.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Criteria for selecting users from a population source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    #[serde(default = "default_enabled")]
    pub enabled_only: bool,
    #[serde(default = "default_enabled")]
    pub require_mail: bool,
    /// Case-insensitive DN fragments; a user whose DN contains any of them is dropped.
    #[serde(default = "default_exclude_ous")]
    pub exclude_ous: Vec<String>,
}

fn default_exclude_ous() -> Vec<String> {
    vec!["OU=External Users".to_string(), "OU=Archived Users".to_string()]
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            enabled_only: true,
            require_mail: true,
            exclude_ous: default_exclude_ous(),
        }
    }
}

impl UserFilter {
    pub fn matches(&self, user: &UserRecord) -> bool {
        if self.enabled_only && !user.enabled {
            return false;
        }
        if self.require_mail && !user.has_mail() {
            return false;
        }
        let dn = user.dn.to_lowercase();
        !self
            .exclude_ous
            .iter()
            .any(|ou| !ou.is_empty() && dn.contains(&ou.to_lowercase()))
    }
}

// ---------------------------------------------------------------------------
// Cohorts
// ---------------------------------------------------------------------------

/// The attribute a cohort is partitioned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CohortKind {
    #[serde(alias = "departments", alias = "dept")]
    Department,
    #[serde(alias = "regions", alias = "state", alias = "states")]
    Region,
    #[serde(alias = "managers")]
    Manager,
    #[serde(alias = "all-employees")]
    All,
}

impl CohortKind {
    /// Run order for a full pass.
    pub const ORDER: [CohortKind; 4] = [
        CohortKind::Department,
        CohortKind::Region,
        CohortKind::Manager,
        CohortKind::All,
    ];

    /// Manager groups carry plain membership; every other kind syncs roles.
    pub fn uses_roles(self) -> bool {
        !matches!(self, CohortKind::Manager)
    }

    pub fn applies_policy(self) -> bool {
        !matches!(self, CohortKind::Manager)
    }
}

impl fmt::Display for CohortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CohortKind::Department => write!(f, "department"),
            CohortKind::Region => write!(f, "region"),
            CohortKind::Manager => write!(f, "manager"),
            CohortKind::All => write!(f, "all"),
        }
    }
}

impl FromStr for CohortKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "department" | "departments" | "dept" => Ok(CohortKind::Department),
            "region" | "regions" | "state" | "states" => Ok(CohortKind::Region),
            "manager" | "managers" => Ok(CohortKind::Manager),
            "all" | "all-employees" | "employees" => Ok(CohortKind::All),
            other => Err(format!(
                "unknown cohort kind '{other}'; expected: departments, regions, managers, all"
            )),
        }
    }
}

/// One member of a cohort with its derived role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortMember {
    pub user: UserRecord,
    pub role: Role,
}

/// Users sharing one category value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cohort {
    pub kind: CohortKind,
    /// Normalized match key (lower-cased value, or the manager's DN).
    pub key: String,
    /// Canonical value used for group naming.
    pub value: String,
    /// Human-facing value used in labels.
    pub display: String,
    pub members: Vec<CohortMember>,
}

impl Cohort {
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Fold another cohort that names the same group into this one. A user
    /// present in both keeps the higher role.
    pub fn absorb(&mut self, other: Cohort) {
        for member in other.members {
            let existing = self
                .members
                .iter_mut()
                .find(|m| m.user.dn.eq_ignore_ascii_case(&member.user.dn));
            match existing {
                Some(existing) => existing.role = existing.role.max(member.role),
                None => self.members.push(member),
            }
        }
    }

    /// Desired membership for a backend keyed by `key`. Users without that
    /// attribute are omitted; roles are dropped when `with_roles` is false.
    pub fn desired(&self, key: IdentityKey, with_roles: bool) -> MemberMap {
        let mut desired = MemberMap::new();
        for member in &self.members {
            let Some(identity) = member.user.identity(key) else {
                continue;
            };
            let role = with_roles.then_some(member.role);
            desired
                .entry(identity)
                .and_modify(|existing| {
                    if role > *existing {
                        *existing = role;
                    }
                })
                .or_insert(role);
        }
        desired
    }
}

/// Why a cohort was not reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The value slugs to an empty string.
    EmptySlug,
    /// No users matched after filtering.
    NoMembers,
    /// The manager is referenced but absent from the population.
    ManagerNotFound,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptySlug => write!(f, "value does not form a group name"),
            SkipReason::NoMembers => write!(f, "no users matched"),
            SkipReason::ManagerNotFound => write!(f, "manager not found in population"),
        }
    }
}

/// A cohort skipped with a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCohort {
    pub kind: CohortKind,
    pub value: String,
    pub reason: SkipReason,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// Deterministic identity of one logical group. Never mutated within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GroupDescriptor {
    pub kind: CohortKind,
    pub value: String,
    pub slug: String,
    /// Primary key (CN / group name).
    pub name: String,
    /// Stable secondary key (email-like address).
    pub address: String,
    pub label: String,
    pub description: String,
}

impl fmt::Display for GroupDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
