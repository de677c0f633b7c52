use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam::queue::ArrayQueue;

use crate::unique_id::TaskId;

/// Implemented by types that can be returned to a cleared, fresh-looking
/// state before re-entering an [ObjectPool]'s free list.
pub(crate) trait Reset {
    fn reset(&mut self);
}

/// Pooled shell that a task record populates for dispatch and releases once
/// the executor is done with it. Carries no user data of its own; a fresh
/// record and a just-reset one must be indistinguishable on every field.
#[derive(Default)]
pub(crate) struct JobRecord {
    pub task_id: Option<TaskId>,
    pub priority: i8,
    pub timeout_ms: u64,
    pub dispatched_at: Option<Instant>,
}

impl Reset for JobRecord {
    fn reset(&mut self) {
        self.task_id = None;
        self.priority = 0;
        self.timeout_ms = 0;
        self.dispatched_at = None;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total_created: usize,
    pub free: usize,
    pub in_use: usize,
    pub max: usize,
}

/// Bounded free-list of reusable job records, backed by a lock-free queue so
/// acquire/release never contend with user code running on worker threads.
pub(crate) struct ObjectPool<T> {
    free: ArrayQueue<T>,
    max: usize,
    total_created: AtomicUsize,
    in_use: AtomicUsize,
}

impl<T: Default + Reset> ObjectPool<T> {
    pub(crate) fn new(initial: usize, max: usize) -> Self {
        let max = max.max(1);
        let free = ArrayQueue::new(max);
        let initial = initial.min(max);
        for _ in 0..initial {
            // Capacity was just sized to fit `initial`, so this cannot fail.
            let _ = free.push(T::default());
        }
        ObjectPool {
            free,
            max,
            total_created: AtomicUsize::new(initial),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Returns a freshly-reset record, creating a new one if the free list is
    /// empty.
    pub(crate) fn acquire(&self) -> T {
        let mut item = match self.free.pop() {
            Some(item) => item,
            None => {
                self.total_created.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        };
        item.reset();
        self.in_use.fetch_add(1, Ordering::Relaxed);
        item
    }

    /// Resets and returns a record to the pool, or drops it if the free list
    /// is already at capacity.
    pub(crate) fn release(&self, mut item: T) {
        item.reset();
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        let _ = self.free.push(item);
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            total_created: self.total_created.load(Ordering::Relaxed),
            free: self.free.len(),
            in_use: self.in_use.load(Ordering::Relaxed),
            max: self.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_when_empty_and_seeds_initial() {
        let pool: ObjectPool<JobRecord> = ObjectPool::new(2, 4);
        let s = pool.stats();
        assert_eq!(s.total_created, 2);
        assert_eq!(s.free, 2);
    }

    #[test]
    fn release_resets_before_readmitting() {
        let pool: ObjectPool<JobRecord> = ObjectPool::new(0, 2);
        let mut rec = pool.acquire();
        rec.task_id = Some(TaskId::new());
        rec.priority = 5;
        pool.release(rec);
        let rec2 = pool.acquire();
        assert!(rec2.task_id.is_none());
        assert_eq!(rec2.priority, 0);
    }

    #[test]
    fn release_drops_past_max() {
        let pool: ObjectPool<JobRecord> = ObjectPool::new(0, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert!(pool.stats().free <= 1);
    }
}
