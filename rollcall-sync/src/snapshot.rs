//! Directory snapshots: on-disk state for the in-memory directory.
//!
//! A state file holds one [`DirectorySnapshot`] per directory:
//!
//! ```json
//! {
//!   "saved_at": "2026-01-05T10:00:00Z",
//!   "directory_a": { "groups": { … }, "mailboxes": {}, "default_mailbox": true },
//!   "directory_b": { "groups": { … }, "mailboxes": { "x@corp.test": false } }
//! }
//! ```
//!
//! Writes use the atomic `.tmp` + rename pattern.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rollcall_core::config::GroupPolicy;
use rollcall_core::types::{Identity, MemberMap};

use crate::error::{io_err, SyncError};

/// One group as stored by a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: MemberMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<GroupPolicy>,
}

impl GroupRecord {
    pub fn new(name: &str, address: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            address: address.map(str::to_string),
            label: String::new(),
            description: String::new(),
            members: MemberMap::new(),
            policy: None,
        }
    }
}

/// Full contents of one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    /// Keyed by lower-cased group name.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupRecord>,
    /// Per-identity mailbox status overrides.
    #[serde(default)]
    pub mailboxes: BTreeMap<Identity, bool>,
    /// Mailbox status for identities not listed in `mailboxes`.
    #[serde(default = "default_mailbox")]
    pub default_mailbox: bool,
}

fn default_mailbox() -> bool {
    true
}

impl Default for DirectorySnapshot {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
            mailboxes: BTreeMap::new(),
            default_mailbox: default_mailbox(),
        }
    }
}

/// Both directories in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryState {
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub directory_a: DirectorySnapshot,
    #[serde(default)]
    pub directory_b: DirectorySnapshot,
}

impl Default for DirectoryState {
    fn default() -> Self {
        Self {
            saved_at: Utc::now(),
            directory_a: DirectorySnapshot::default(),
            directory_b: DirectorySnapshot::default(),
        }
    }
}

/// Load a state file. Returns empty directories if the file does not exist.
pub fn load_state(path: &Path) -> Result<DirectoryState, SyncError> {
    if !path.exists() {
        return Ok(DirectoryState::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(DirectoryState::default());
    }
    Ok(serde_json::from_str(&contents)?)
}

/// Save a state file atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_state(path: &Path, state: &DirectoryState) -> Result<(), SyncError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}
