//! Rollcall core library: domain types, cohort building, group naming, config.
//!
//! Nothing in this crate talks to a directory. It turns a user population
//! into deterministic desired state:
//! - [`types`]: identities, roles, users, cohorts, descriptors
//! - [`slug`]: canonical slugs and value normalization
//! - [`cohort`]: [`CohortBuilder`]
//! - [`naming`]: [`GroupDescriptor`] derivation
//! - [`config`] / [`population`]: YAML loaders
//! - [`error`]: [`ConfigError`]

pub mod cohort;
pub mod config;
pub mod error;
pub mod naming;
pub mod population;
pub mod slug;
pub mod types;

pub use cohort::CohortBuilder;
pub use config::{GroupPolicy, RetryConfig, RollcallConfig};
pub use error::ConfigError;
pub use naming::describe;
pub use population::{load_population, Population};
pub use types::{
    Cohort, CohortKind, CohortMember, GroupDescriptor, Identity, IdentityKey, MemberMap, Role,
    SkipReason, SkippedCohort, UserFilter, UserRecord,
};
