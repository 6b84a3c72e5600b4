//! Fixed-capacity task pool
//!
//! All per-client IO loops run here, so the number of concurrently running
//! tasks is bounded by the pool capacity rather than by connection count.
//! Saturation is reported synchronously to the caller, which is the server's
//! admission-control backpressure: a full pool rejects new connections
//! instead of queueing them.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::warn;

use crate::error::{Error, Result};

/// Fixed-capacity executor for client IO tasks
pub struct TaskPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// A reserved pool slot.
///
/// Reserving and spawning are separate steps so a caller can surface a
/// rejection while it still owns the resources the task would consume.
pub struct TaskSlot {
    permit: OwnedSemaphorePermit,
}

impl TaskPool {
    /// Create a pool with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Reserve a slot, failing synchronously when the pool is saturated or
    /// released
    pub fn try_reserve(&self) -> Result<TaskSlot> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(TaskSlot { permit }),
            Err(TryAcquireError::NoPermits) => {
                Err(Error::capacity_exhausted("task pool saturated"))
            }
            Err(TryAcquireError::Closed) => Err(Error::capacity_exhausted("task pool released")),
        }
    }

    /// Reserve a slot and run the task on it
    pub fn try_spawn<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.try_reserve().map(|slot| slot.spawn(task))
    }

    /// Stop accepting tasks. In-flight tasks run to completion.
    pub fn release(&self) {
        self.permits.close();
    }

    /// Pool capacity fixed at construction
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently free slots
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl TaskSlot {
    /// Run a task on the reserved slot. The slot is freed when the task
    /// finishes, panicking or not; panics are contained and logged.
    pub fn spawn<F>(self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self.permit;
        tokio::spawn(async move {
            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                warn!("pooled task panicked");
            }
            drop(permit);
        });
    }
}
