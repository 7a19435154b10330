//! Bounded worker pools
//!
//! Tasks are spawned straight away but only start running once they hold a
//! semaphore permit, so at most `size` of them make progress at any time.
//! [`WorkerPool`] owns its tasks and is joined by the caller; [`TaskPool`]
//! is shared between handles and its tasks run detached.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::error;

pub struct WorkerPool<T> {
    name: &'static str,
    size: usize,
    semaphore: Arc<Semaphore>,
    set: JoinSet<T>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            set: JoinSet::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks spawned and not yet joined, queued ones included
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Whether another task would start without waiting for a permit
    pub fn has_capacity(&self) -> bool {
        self.set.len() < self.size
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        self.set.spawn(async move {
            // The semaphore is never closed, so acquiring only waits.
            let _permit = semaphore.acquire_owned().await;
            task.await
        });
    }

    /// Next finished task; a panicked task is reported as `Err`
    pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
        let joined = self.set.join_next().await?;
        if let Err(e) = &joined {
            error!(pool = self.name, error = %e, "Worker task panicked");
        }
        Some(joined)
    }

    /// Wait for every task, dropping panicked ones
    pub async fn join_all(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.set.len());
        while let Some(joined) = self.join_next().await {
            if let Ok(value) = joined {
                out.push(value);
            }
        }
        out
    }
}

/// Clonable pool for detached background work
#[derive(Debug, Clone)]
pub struct TaskPool {
    name: &'static str,
    size: usize,
    semaphore: Arc<Semaphore>,
}

impl TaskPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks currently holding a permit
    pub fn busy(&self) -> usize {
        self.size - self.semaphore.available_permits()
    }

    pub fn spawn<F, T>(&self, task: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            task.await
        })
    }
}
