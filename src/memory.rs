use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use sysinfo::System;

use crate::object_pool::{JobRecord, ObjectPool, PoolStats};
use crate::task::TaskRecord;
use crate::unique_id::TaskId;

/// A single cleanup tick processes at most this many queued ids, so a long
/// backlog is spread across several ticks rather than stalling one.
const CLEANUP_BATCH_LIMIT: usize = 512;

/// Minimum fraction of system memory that must be free for admission to
/// succeed, independent of the configured percentage limit.
const MIN_FREE_FRACTION: f64 = 0.30;

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub active: usize,
    pub pending_cleanup: usize,
    pub total_tasks_created: u64,
    pub cleanup_operations: u64,
    pub time_since_last_cleanup_ms: u64,
    pub system_total_memory_bytes: u64,
    pub system_free_memory_bytes: u64,
    pub system_used_memory_bytes: u64,
    pub system_memory_usage_percent: f64,
    pub job_pool: PoolStats,
}

/// Registers tasks for weak tracking, runs periodic cleanup, gates admission
/// by system memory, and fronts the job-record object pool.
pub(crate) struct MemoryManager {
    /// Canonical strong store: the only thing keeping a task's `Arc` alive
    /// between dispatch and cleanup.
    active: DashMap<TaskId, Arc<TaskRecord>>,
    /// Weak mirror of `active`, consulted by cleanup to decide whether a
    /// task is still referenced by anything once `active` drops its entry.
    registry: DashMap<TaskId, Weak<TaskRecord>>,
    /// Job records checked out of `job_pool`, held for the task's full
    /// lifetime and only returned to the pool once cleanup actually
    /// reclaims the task — `in_use` on the pool's stats is meant to track
    /// tasks occupying a slot, not the sub-millisecond dispatch handoff.
    jobs: DashMap<TaskId, JobRecord>,
    cleanup_queue: Mutex<VecDeque<TaskId>>,

    total_created: AtomicU64,
    cleanup_ops: AtomicU64,
    last_cleanup: Mutex<Instant>,

    memory_limit_percent: AtomicU8,
    system: Mutex<(System, Instant)>,

    job_pool: ArcSwap<ObjectPool<JobRecord>>,
    cleanup_interval_ms: AtomicU64,

    shutdown: AtomicBool,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryManager {
    pub(crate) fn new(memory_limit_percent: u8, pool_initial: usize, pool_max: usize) -> Self {
        let mut system = System::new();
        system.refresh_all();
        MemoryManager {
            active: DashMap::new(),
            registry: DashMap::new(),
            jobs: DashMap::new(),
            cleanup_queue: Mutex::new(VecDeque::new()),
            total_created: AtomicU64::new(0),
            cleanup_ops: AtomicU64::new(0),
            last_cleanup: Mutex::new(Instant::now()),
            memory_limit_percent: AtomicU8::new(memory_limit_percent),
            system: Mutex::new((system, Instant::now())),
            job_pool: ArcSwap::from_pointee(ObjectPool::new(pool_initial, pool_max)),
            cleanup_interval_ms: AtomicU64::new(5_000),
            shutdown: AtomicBool::new(false),
            janitor: Mutex::new(None),
        }
    }

    /// Starts the background thread that drains the cleanup queue on
    /// `cleanup_interval_ms` cadence. Only callable once the manager is
    /// behind an `Arc`, since the thread needs to outlive this call.
    pub(crate) fn spawn_janitor(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            const POLL_MS: u64 = 50;
            let mut waited_ms: u64 = 0;
            loop {
                if inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(POLL_MS));
                waited_ms += POLL_MS;
                if waited_ms >= inner.cleanup_interval_ms() {
                    waited_ms = 0;
                    inner.run_cleanup_tick();
                }
            }
        });
        *self.janitor.lock().unwrap() = Some(handle);
    }

    pub(crate) fn cleanup_interval_ms(&self) -> u64 {
        self.cleanup_interval_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn set_cleanup_interval_ms(&self, ms: u64) {
        self.cleanup_interval_ms.store(ms.max(1), Ordering::Relaxed);
    }

    pub(crate) fn register(&self, id: TaskId, record: Arc<TaskRecord>) {
        let weak = Arc::downgrade(&record);
        self.active.insert(id, record);
        self.registry.insert(id, weak);
        self.total_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lookup(&self, id: TaskId) -> Option<Arc<TaskRecord>> {
        self.active.get(&id).map(|r| r.clone())
    }

    pub(crate) fn active_ids(&self) -> Vec<TaskId> {
        self.active.iter().map(|e| *e.key()).collect()
    }

    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn mark_for_cleanup(&self, id: TaskId) {
        self.cleanup_queue.lock().unwrap().push_back(id);
    }

    /// Immediate removal: the fast path for `spawn -> join -> drop` usage
    /// where the caller is known to be done with the id.
    pub(crate) fn unregister(&self, id: TaskId) {
        self.active.remove(&id);
        self.registry.remove(&id);
        if let Some((_, job)) = self.jobs.remove(&id) {
            self.release_job(job);
        }
        self.cleanup_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn acquire_job(&self) -> JobRecord {
        self.job_pool.load().acquire()
    }

    /// Checks a job record out of the pool into per-task storage, held
    /// until the task is actually reclaimed by cleanup.
    pub(crate) fn store_job(&self, id: TaskId, job: JobRecord) {
        self.jobs.insert(id, job);
    }

    /// Stamps the stored job record's dispatch time once a worker picks the
    /// task up. No-op if the record was already released (shouldn't happen
    /// under normal operation).
    pub(crate) fn mark_job_dispatched(&self, id: TaskId) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.dispatched_at = Some(Instant::now());
        }
    }

    fn release_job(&self, job: JobRecord) {
        self.job_pool.load().release(job);
    }

    pub(crate) fn job_pool_stats(&self) -> PoolStats {
        self.job_pool.load().stats()
    }

    pub(crate) fn resize_job_pool(&self, initial: usize, max: usize) {
        self.job_pool
            .store(Arc::new(ObjectPool::new(initial, max)));
    }

    pub(crate) fn set_memory_limit_percent(&self, percent: u8) {
        self.memory_limit_percent.store(percent, Ordering::Relaxed);
    }

    pub(crate) fn memory_limit_percent(&self) -> u8 {
        self.memory_limit_percent.load(Ordering::Relaxed)
    }

    /// Admission gate: denies when system memory usage is above the
    /// configured limit, or when free memory drops below 30%. Read
    /// failures default to permit (fail-open) so a misreading can never
    /// deadlock submissions.
    pub(crate) fn may_admit(&self) -> bool {
        match self.read_system_memory() {
            Some((used_percent, free_fraction)) => {
                let limit = self.memory_limit_percent() as f64;
                used_percent <= limit && free_fraction >= MIN_FREE_FRACTION
            }
            None => true,
        }
    }

    /// Refreshes the cached `sysinfo::System` at most once every 200ms to
    /// bound syscall cost, and returns (used_percent, free_fraction).
    fn read_system_memory(&self) -> Option<(f64, f64)> {
        let mut guard = self.system.lock().unwrap();
        let (system, last_refresh) = &mut *guard;
        if last_refresh.elapsed().as_millis() > 200 {
            system.refresh_all();
            *last_refresh = Instant::now();
        }
        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        let used = system.used_memory();
        let free = total.saturating_sub(used);
        let used_percent = 100.0 * used as f64 / total as f64;
        let free_fraction = free as f64 / total as f64;
        Some((used_percent, free_fraction))
    }

    /// CPU estimate for the metrics sampler; falls back to the supplied
    /// worker-utilisation estimate when no direct reading is available.
    pub(crate) fn cpu_percent_estimate(&self, worker_utilisation_fallback: f64) -> f64 {
        let mut guard = self.system.lock().unwrap();
        let (system, _) = &mut *guard;
        let cpus = system.cpus();
        if cpus.is_empty() {
            return (worker_utilisation_fallback * 100.0).clamp(0.0, 100.0);
        }
        let avg = cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64;
        if avg <= 0.0 {
            (worker_utilisation_fallback * 100.0).clamp(0.0, 100.0)
        } else {
            avg
        }
    }

    pub(crate) fn mem_percent(&self) -> f64 {
        self.read_system_memory().map(|(p, _)| p).unwrap_or(0.0)
    }

    /// Runs one bounded cleanup pass: drains up to `CLEANUP_BATCH_LIMIT`
    /// queued ids, drops the canonical strong reference for each, and
    /// reclaims the registry entry only once the weak reference has
    /// expired. Ids that are still referenced are requeued for the next
    /// tick.
    pub(crate) fn run_cleanup_tick(&self) {
        let batch: Vec<TaskId> = {
            let mut q = self.cleanup_queue.lock().unwrap();
            let n = q.len().min(CLEANUP_BATCH_LIMIT);
            q.drain(..n).collect()
        };

        for id in batch {
            let weak = self.registry.get(&id).map(|r| r.clone());
            self.active.remove(&id);
            let still_referenced = weak.as_ref().and_then(|w| w.upgrade()).is_some();
            if still_referenced {
                self.cleanup_queue.lock().unwrap().push_back(id);
            } else {
                self.registry.remove(&id);
                if let Some((_, job)) = self.jobs.remove(&id) {
                    self.release_job(job);
                }
                self.cleanup_ops.fetch_add(1, Ordering::Relaxed);
            }
        }

        *self.last_cleanup.lock().unwrap() = Instant::now();
    }

    pub(crate) fn force_cleanup(&self) {
        // A bounded tick may not drain a very long backlog in one pass;
        // force_cleanup runs until the queue the caller observed is gone.
        loop {
            let remaining = self.cleanup_queue.lock().unwrap().len();
            if remaining == 0 {
                break;
            }
            self.run_cleanup_tick();
        }
    }

    pub(crate) fn stats(&self) -> MemoryStats {
        let (used_percent, free_fraction) = self.read_system_memory().unwrap_or((0.0, 1.0));
        let total = self
            .system
            .lock()
            .unwrap()
            .0
            .total_memory();
        let used = (total as f64 * used_percent / 100.0) as u64;
        let free = (total as f64 * free_fraction) as u64;
        MemoryStats {
            active: self.active.len(),
            pending_cleanup: self.cleanup_queue.lock().unwrap().len(),
            total_tasks_created: self.total_created.load(Ordering::Relaxed),
            cleanup_operations: self.cleanup_ops.load(Ordering::Relaxed),
            time_since_last_cleanup_ms: self.last_cleanup.lock().unwrap().elapsed().as_millis()
                as u64,
            system_total_memory_bytes: total,
            system_free_memory_bytes: free,
            system_used_memory_bytes: used,
            system_memory_usage_percent: used_percent,
            job_pool: self.job_pool_stats(),
        }
    }

    /// Signals the janitor thread to stop and joins it. Explicit rather
    /// than left to `Drop`: the janitor holds its own `Arc<MemoryManager>`
    /// clone for the lifetime of its loop, so the strong count never
    /// reaches zero on its own.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.janitor.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
