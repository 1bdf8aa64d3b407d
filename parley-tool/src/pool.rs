//! Bounded worker pool for blocking invocations.

use parley_core::{ParleyError, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A bounded set of worker slots for blocking tool invocations.
///
/// The pool is the only resource shared across invocations; it is mutated
/// solely through slot acquire/release. One pool can be shared across
/// sessions. At most `capacity` blocking invocations run at any instant;
/// excess invocations queue on the semaphore, which surfaces as batch
/// latency, never as an error.
#[derive(Clone)]
pub struct ExecutionPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl ExecutionPool {
    /// Create a pool with the given number of worker slots.
    pub fn new(capacity: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(capacity)), capacity }
    }

    /// Total worker slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Acquire one worker slot, waiting if the pool is saturated.
    ///
    /// The slot is released when the returned guard drops — on normal
    /// completion, or early when a cancelled worker is evicted from pool
    /// accounting while its native call finishes unobserved.
    pub async fn acquire(&self) -> Result<WorkerSlot> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ParleyError::fault("execution pool semaphore closed"))?;
        Ok(WorkerSlot { _permit: permit })
    }
}

/// One held worker slot. No invocation may hold more than one.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capacity_accounting() {
        let pool = ExecutionPool::new(2);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.available(), 2);

        let slot = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 1);
        drop(slot);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_saturated_pool_queues() {
        let pool = ExecutionPool::new(1);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.unwrap() })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }
}
