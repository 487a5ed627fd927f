//! Bounded task pool.
//!
//! A pool runs a batch of futures as tokio tasks with at most `limit` in
//! flight, then waits for every one of them before returning. Nothing spawned
//! here outlives the call to [`TaskPool::run`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct TaskPool {
    name: String,
    limit: usize,
    permits: Arc<Semaphore>,
}

impl TaskPool {
    /// A pool with at most `limit` concurrent tasks. A zero limit is raised to 1.
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            name: name.into(),
            limit,
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run every `(label, future)` pair and return results in input order.
    ///
    /// A task that panics yields [`SyncError::TaskPanic`] in its slot; its
    /// siblings are unaffected.
    pub async fn run<F>(&self, tasks: Vec<(String, F)>) -> Vec<Result<F::Output, SyncError>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut handles: Vec<(String, Option<JoinHandle<F::Output>>)> =
            Vec::with_capacity(tasks.len());

        for (label, task) in tasks {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    handles.push((label, None));
                    continue;
                }
            };
            let handle = tokio::spawn(async move {
                let output = task.await;
                drop(permit);
                output
            });
            handles.push((label, Some(handle)));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (label, handle) in handles {
            let result = match handle {
                Some(handle) => handle.await.map_err(|err| {
                    tracing::error!(pool = %self.name, task = %label, error = %err, "task failed");
                    SyncError::TaskPanic {
                        task: label,
                        message: err.to_string(),
                    }
                }),
                None => Err(SyncError::TaskPanic {
                    task: label,
                    message: format!("pool {} is closed", self.name),
                }),
            };
            results.push(result);
        }
        results
    }
}
