//! # rollcall-sync
//!
//! Reconciliation engine for directory group memberships.
//!
//! Call [`pipeline::run`] with a population, a config and the directory
//! backends to reconcile every configured cohort, or drive a single
//! (group, backend) unit through [`Reconciler`].

pub mod backend;
pub mod diff;
pub mod eligibility;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod population;
pub mod reconciler;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod snapshot;

pub use backend::{BackendError, DirectoryBackend, ErrorKind, GroupKey, GroupRef};
pub use error::SyncError;
pub use memory::MemoryDirectory;
pub use reconciler::{BackendOutcome, ReconciliationPlan, Reconciler};
pub use report::{ReportSink, RunReport, SyncOutcome, TracingSink};
