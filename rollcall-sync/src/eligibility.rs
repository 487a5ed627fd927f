//! Run-scoped eligibility cache for additions.
//!
//! Wraps a backend's `mailbox_status` lookup with a read-through cache. One
//! filter is built per backend per run and shared by every reconciliation task
//! of that run; it is never invalidated mid-run.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use rollcall_core::types::Identity;

use crate::backend::DirectoryBackend;
use crate::scheduler::TaskPool;

pub struct EligibilityFilter {
    backend: Arc<dyn DirectoryBackend>,
    cache: RwLock<HashMap<Identity, bool>>,
    pool: TaskPool,
}

impl EligibilityFilter {
    /// `limit` bounds in-flight lookups in [`EligibilityFilter::filter_eligible`].
    pub fn new(backend: Arc<dyn DirectoryBackend>, limit: usize) -> Self {
        let pool = TaskPool::new(format!("{}-eligibility", backend.name()), limit);
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            pool,
        }
    }

    /// Cached lookup. A lookup error counts as ineligible and is cached too.
    pub async fn is_eligible(&self, identity: &Identity) -> bool {
        if let Some(cached) = self.cache.read().await.get(identity) {
            return *cached;
        }

        let eligible = match self.backend.mailbox_status(identity).await {
            Ok(status) => status,
            Err(err) => {
                tracing::debug!(
                    backend = %self.backend.name(),
                    identity = %identity,
                    error = %err,
                    "mailbox lookup failed; treating as ineligible"
                );
                false
            }
        };

        // Concurrent lookups of the same identity compute the same value.
        self.cache.write().await.insert(identity.clone(), eligible);
        eligible
    }

    /// Look up every identity with bounded concurrency and return the
    /// eligible ones. Output order is unspecified.
    pub async fn filter_eligible(self: &Arc<Self>, identities: Vec<Identity>) -> Vec<Identity> {
        let tasks = identities
            .into_iter()
            .map(|identity| {
                let filter = Arc::clone(self);
                (identity.to_string(), async move {
                    let eligible = filter.is_eligible(&identity).await;
                    (identity, eligible)
                })
            })
            .collect();

        self.pool
            .run(tasks)
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok((identity, true)) => Some(identity),
                Ok((_, false)) => None,
                Err(err) => {
                    tracing::debug!(error = %err, "eligibility task failed");
                    None
                }
            })
            .collect()
    }

    /// Number of identities resolved so far.
    pub async fn cached(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, MemoryDirectory};
    use rollcall_core::types::IdentityKey;

    fn directory() -> Arc<MemoryDirectory> {
        let dir = MemoryDirectory::new("workspace", IdentityKey::Email).with_eligibility(true);
        dir.set_mailbox(&Identity::from("ok@corp.test"), true);
        dir.set_mailbox(&Identity::from("nobox@corp.test"), false);
        dir.fail_mailbox(&Identity::from("broken@corp.test"));
        Arc::new(dir)
    }

    fn mailbox_calls(dir: &MemoryDirectory) -> usize {
        dir.calls()
            .iter()
            .filter(|c| matches!(c, Call::MailboxStatus { .. }))
            .count()
    }

    #[tokio::test]
    async fn lookups_are_memoized() {
        let dir = directory();
        let filter = EligibilityFilter::new(dir.clone(), 10);

        let id = Identity::from("ok@corp.test");
        assert!(filter.is_eligible(&id).await);
        assert!(filter.is_eligible(&id).await);
        assert_eq!(mailbox_calls(&dir), 1);
        assert_eq!(filter.cached().await, 1);
    }

    #[tokio::test]
    async fn errors_count_as_ineligible() {
        let filter = EligibilityFilter::new(directory(), 10);
        assert!(!filter.is_eligible(&Identity::from("broken@corp.test")).await);
        assert!(!filter.is_eligible(&Identity::from("nobox@corp.test")).await);
    }

    #[tokio::test]
    async fn batch_returns_only_eligible() {
        let dir = directory();
        let filter = Arc::new(EligibilityFilter::new(dir.clone(), 10));

        let mut eligible = filter
            .filter_eligible(vec![
                Identity::from("ok@corp.test"),
                Identity::from("nobox@corp.test"),
                Identity::from("broken@corp.test"),
                Identity::from("unknown@corp.test"),
            ])
            .await;
        eligible.sort();

        // Unknown identities fall back to the directory's default (eligible).
        assert_eq!(
            eligible,
            vec![Identity::from("ok@corp.test"), Identity::from("unknown@corp.test")]
        );
        assert_eq!(mailbox_calls(&dir), 4);
    }
}
