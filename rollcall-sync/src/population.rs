//! Population sources.

use std::path::PathBuf;

use async_trait::async_trait;

use rollcall_core::population::load_population;
use rollcall_core::types::{UserFilter, UserRecord};

use crate::error::SyncError;

/// Supplies the users a run partitions into cohorts.
#[async_trait]
pub trait PopulationSource: Send + Sync {
    async fn fetch_users(&self, filter: &UserFilter) -> Result<Vec<UserRecord>, SyncError>;
}

/// Reads a YAML population file on every fetch.
#[derive(Debug, Clone)]
pub struct FilePopulation {
    path: PathBuf,
}

impl FilePopulation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PopulationSource for FilePopulation {
    async fn fetch_users(&self, filter: &UserFilter) -> Result<Vec<UserRecord>, SyncError> {
        let path = self.path.clone();
        let population = tokio::task::spawn_blocking(move || load_population(&path))
            .await
            .map_err(|err| SyncError::TaskPanic {
                task: "load population".into(),
                message: err.to_string(),
            })??;
        let users = population.filtered(filter);
        tracing::debug!(
            path = %self.path.display(),
            total = population.users.len(),
            kept = users.len(),
            "population loaded"
        );
        Ok(users)
    }
}

/// A fixed list of users.
#[derive(Debug, Clone, Default)]
pub struct StaticPopulation {
    users: Vec<UserRecord>,
}

impl StaticPopulation {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl PopulationSource for StaticPopulation {
    async fn fetch_users(&self, filter: &UserFilter) -> Result<Vec<UserRecord>, SyncError> {
        Ok(self
            .users
            .iter()
            .filter(|user| filter.matches(user))
            .cloned()
            .collect())
    }
}
