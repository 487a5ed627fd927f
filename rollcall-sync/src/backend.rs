//! Directory backend capability contract.
//!
//! One trait covers both directories. Directory A implements the required
//! methods; directory B additionally opts into roles, eligibility and policy
//! through the `supports_*` flags and the matching default-bodied methods.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rollcall_core::config::GroupPolicy;
use rollcall_core::types::{GroupDescriptor, Identity, IdentityKey, Role};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structured classification of a backend failure. Retry decisions are made
/// on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Resource absent, possibly because creation has not propagated yet.
    NotFound,
    /// Resource already exists (duplicate create, member already present).
    Conflict,
    RateLimited,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::RateLimited => write!(f, "rate limited"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::fatal(format!("{operation} is not supported by this backend"))
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

// ---------------------------------------------------------------------------
// Group handles
// ---------------------------------------------------------------------------

/// How to look a group up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey<'a> {
    /// Stable secondary key (email-like address).
    Address(&'a str),
    /// Primary key (CN / group name).
    Name(&'a str),
}

impl fmt::Display for GroupKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Address(a) => write!(f, "address {a}"),
            GroupKey::Name(n) => write!(f, "name {n}"),
        }
    }
}

/// A resolved remote group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    /// Backend-specific handle (DN, group id).
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl GroupRef {
    /// Whether the group's address matches `address`, ignoring case.
    pub fn has_address(&self, address: &str) -> bool {
        self.address
            .as_deref()
            .map(|a| a.trim().eq_ignore_ascii_case(address.trim()))
            .unwrap_or(false)
    }
}

/// Fields for creating a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSpec {
    pub name: String,
    pub address: String,
    pub label: String,
    pub description: String,
}

impl From<&GroupDescriptor> for GroupSpec {
    fn from(d: &GroupDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            address: d.address.clone(),
            label: d.label.clone(),
            description: d.description.clone(),
        }
    }
}

/// One page of a member listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberPage {
    pub members: Vec<(Identity, Option<Role>)>,
    /// Cursor for the next page; `None` on the last page.
    pub next: Option<String>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A directory that holds groups and memberships.
///
/// Implementations must be safe for concurrent use by several reconciliation
/// tasks at once.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// The user attribute this directory keys members by.
    fn identity_key(&self) -> IdentityKey;

    fn supports_roles(&self) -> bool {
        false
    }

    fn supports_policy(&self) -> bool {
        false
    }

    /// Whether additions must be gated by [`DirectoryBackend::mailbox_status`].
    fn supports_eligibility(&self) -> bool {
        false
    }

    /// `Ok(None)` when no group matches.
    async fn lookup_group(&self, key: GroupKey<'_>) -> Result<Option<GroupRef>, BackendError>;

    /// Create a group. A duplicate returns [`ErrorKind::Conflict`].
    async fn create_group(&self, spec: &GroupSpec) -> Result<GroupRef, BackendError>;

    /// Set a group's address after it was found by name with the wrong one.
    async fn update_group_address(
        &self,
        _group: &GroupRef,
        _address: &str,
    ) -> Result<(), BackendError> {
        Err(BackendError::unsupported("update_group_address"))
    }

    /// Fetch one page of members. `cursor` is `None` for the first page.
    async fn list_members(
        &self,
        group: &GroupRef,
        cursor: Option<&str>,
    ) -> Result<MemberPage, BackendError>;

    /// Add a member. `role` is `None` on backends without roles.
    async fn add_member(
        &self,
        group: &GroupRef,
        identity: &Identity,
        role: Option<Role>,
    ) -> Result<(), BackendError>;

    async fn remove_member(&self, group: &GroupRef, identity: &Identity)
        -> Result<(), BackendError>;

    async fn update_member_role(
        &self,
        _group: &GroupRef,
        _identity: &Identity,
        _role: Role,
    ) -> Result<(), BackendError> {
        Err(BackendError::unsupported("update_member_role"))
    }

    /// Whether the identity can receive mail in this directory.
    async fn mailbox_status(&self, _identity: &Identity) -> Result<bool, BackendError> {
        Ok(true)
    }

    async fn apply_policy(
        &self,
        _group: &GroupRef,
        _policy: &GroupPolicy,
    ) -> Result<(), BackendError> {
        Err(BackendError::unsupported("apply_policy"))
    }
}
