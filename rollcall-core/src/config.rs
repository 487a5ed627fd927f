//! Run configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.rollcall/
//!   config.yaml
//! ```
//!
//! # API pattern
//!
//! Every loader has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Every field carries a serde default, so an empty file is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{CohortKind, UserFilter};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Name and label templates for one cohort kind.
///
/// `{slug}` expands to the slugged cohort value, `{value}` to its display form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameTemplate {
    pub name: String,
    pub label: String,
}

impl NameTemplate {
    fn new(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default = "default_department_naming")]
    pub department: NameTemplate,
    #[serde(default = "default_region_naming")]
    pub region: NameTemplate,
    #[serde(default = "default_manager_naming")]
    pub manager: NameTemplate,
    #[serde(default = "default_all_naming")]
    pub all: NameTemplate,
}

fn default_department_naming() -> NameTemplate {
    NameTemplate::new("list-dept-{slug}", "Dept: {value}")
}

fn default_region_naming() -> NameTemplate {
    NameTemplate::new("list-state-{slug}", "State: {value}")
}

fn default_manager_naming() -> NameTemplate {
    NameTemplate::new("list-reports-{slug}", "Manager: {value}")
}

fn default_all_naming() -> NameTemplate {
    NameTemplate::new("list-all-employees", "All Employees")
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            department: default_department_naming(),
            region: default_region_naming(),
            manager: default_manager_naming(),
            all: default_all_naming(),
        }
    }
}

impl NamingConfig {
    pub fn template(&self, kind: CohortKind) -> &NameTemplate {
        match kind {
            CohortKind::Department => &self.department,
            CohortKind::Region => &self.region,
            CohortKind::Manager => &self.manager,
            CohortKind::All => &self.all,
        }
    }
}

/// Worker limits. Each is an independent concurrency domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_cohort_workers")]
    pub cohort: usize,
    #[serde(default = "default_all_workers")]
    pub all: usize,
    #[serde(default = "default_eligibility_workers")]
    pub eligibility: usize,
}

fn default_cohort_workers() -> usize {
    5
}

fn default_all_workers() -> usize {
    1
}

fn default_eligibility_workers() -> usize {
    10
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            cohort: default_cohort_workers(),
            all: default_all_workers(),
            eligibility: default_eligibility_workers(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn for_kind(&self, kind: CohortKind) -> usize {
        match kind {
            CohortKind::All => self.all,
            _ => self.cohort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_jitter_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

/// Static settings applied to every policy-capable group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupPolicy {
    pub allow_external_members: bool,
    pub allow_web_posting: bool,
    pub allow_google_communication: bool,
    pub is_archived: bool,
    pub members_can_post_as_the_group: bool,
    pub show_in_group_directory: bool,
    pub message_moderation_level: String,
    pub who_can_contact_owner: String,
    pub who_can_add: String,
    pub who_can_discover_group: String,
    pub who_can_join: String,
    pub who_can_leave_group: String,
    pub who_can_post_message: String,
    pub who_can_view_group: String,
    pub who_can_view_membership: String,
    pub who_can_invite: String,
    pub reply_to: String,
}

impl Default for GroupPolicy {
    fn default() -> Self {
        Self {
            allow_external_members: false,
            allow_web_posting: false,
            allow_google_communication: false,
            is_archived: true,
            members_can_post_as_the_group: false,
            show_in_group_directory: false,
            message_moderation_level: "MODERATE_NONE".into(),
            who_can_contact_owner: "ALL_IN_DOMAIN_CAN_CONTACT".into(),
            who_can_add: "NONE_CAN_ADD".into(),
            who_can_discover_group: "ALL_MEMBERS_CAN_DISCOVER".into(),
            who_can_join: "INVITED_CAN_JOIN".into(),
            who_can_leave_group: "NONE_CAN_LEAVE".into(),
            who_can_post_message: "ALL_MANAGERS_CAN_POST".into(),
            who_can_view_group: "ALL_MEMBERS_CAN_VIEW".into(),
            who_can_view_membership: "ALL_MANAGERS_CAN_VIEW".into(),
            who_can_invite: "NONE_CAN_INVITE".into(),
            reply_to: "REPLY_TO_MANAGERS".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollcallConfig {
    #[serde(default = "default_email_domain")]
    pub email_domain: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_targets")]
    pub targets: Vec<CohortKind>,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub policy: GroupPolicy,
    #[serde(default)]
    pub population: UserFilter,
}

fn default_email_domain() -> String {
    "example.com".to_string()
}

fn default_targets() -> Vec<CohortKind> {
    CohortKind::ORDER.to_vec()
}

impl Default for RollcallConfig {
    fn default() -> Self {
        Self {
            email_domain: default_email_domain(),
            dry_run: false,
            targets: default_targets(),
            naming: NamingConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            policy: GroupPolicy::default(),
            population: UserFilter::default(),
        }
    }
}

impl RollcallConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.email_domain.trim().is_empty() {
            return Err(ConfigError::Invalid("email_domain must not be empty".into()));
        }
        let c = &self.concurrency;
        if c.cohort == 0 || c.all == 0 || c.eligibility == 0 {
            return Err(ConfigError::Invalid(
                "concurrency limits must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        for kind in [CohortKind::Department, CohortKind::Region, CohortKind::Manager] {
            let template = self.naming.template(kind);
            if !template.name.contains("{slug}") {
                return Err(ConfigError::Invalid(format!(
                    "naming.{kind}.name must contain {{slug}}"
                )));
            }
        }
        if self.naming.all.name.trim().is_empty() {
            return Err(ConfigError::Invalid("naming.all.name must not be empty".into()));
        }
        Ok(())
    }

    /// Targets in run order with duplicates removed.
    pub fn ordered_targets(&self) -> Vec<CohortKind> {
        CohortKind::ORDER
            .into_iter()
            .filter(|kind| self.targets.contains(kind))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.rollcall/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".rollcall").join("config.yaml")
}

/// Load and validate a config file at an explicit path.
pub fn load_from(path: &Path) -> Result<RollcallConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let config: RollcallConfig = if contents.trim().is_empty() {
        RollcallConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?
    };
    config.validate()?;
    Ok(config)
}

/// Load `<home>/.rollcall/config.yaml`, falling back to defaults when absent.
pub fn load_at(home: &Path) -> Result<RollcallConfig, ConfigError> {
    let path = config_path_at(home);
    match load_from(&path) {
        Err(ConfigError::ConfigNotFound { .. }) => Ok(RollcallConfig::default()),
        other => other,
    }
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<RollcallConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically write `<home>/.rollcall/config.yaml` (`.tmp` sibling + rename).
pub fn save_at(home: &Path, config: &RollcallConfig) -> Result<(), ConfigError> {
    let path = config_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
