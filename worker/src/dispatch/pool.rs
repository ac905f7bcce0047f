//! Supervised pool for batch workers.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

/// Spawns batch workers without ever blocking the caller.
///
/// Batch tasks wait for one of `limit` permits before running, which caps
/// concurrent batches even if the broker prefetch is misconfigured. Finished
/// tasks are reaped through [`WorkerPool::join_next`], which logs panics.
pub struct WorkerPool {
    tasks: JoinSet<()>,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Spawn a batch worker that runs once a permit is free.
    pub fn spawn_batch<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            work.await;
        });
    }

    /// Spawn a short settlement task that needs no permit.
    pub fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(work);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next task to finish. Returns `None` when idle.
    pub async fn join_next(&mut self) -> Option<()> {
        let result = self.tasks.join_next().await?;
        report(result);
        Some(())
    }

    /// Wait for every spawned task.
    pub async fn drain(&mut self) {
        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending = pending, "worker_pool_draining");
        }
        while self.join_next().await.is_some() {}
    }
}

fn report(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "batch_worker_panicked");
        } else {
            error!(error = %e, "batch_worker_cancelled");
        }
    }
}
