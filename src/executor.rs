use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{EngineError, Result};
use crate::logging::{engine_log, LogGate, LogLevel};
use crate::memory::MemoryManager;
use crate::stats::{SchedulerStats, Stats};
use crate::task::{TaskComplexity, TaskRecord};
use crate::unique_id::TaskId;

/// How often the timeout reaper scans registered tasks for expired deadlines.
const REAPER_INTERVAL_MS: u64 = 50;

/// Bound on the completed-task timing ring the classifier reads from.
const TASK_HISTORY_CAP: usize = 1000;

type Closure = Box<dyn FnOnce() -> std::result::Result<Vec<u8>, String> + Send + 'static>;

enum Job {
    Run {
        record: Arc<TaskRecord>,
        closure: Closure,
    },
    Shutdown,
}

/// Timing of one completed task, kept in the bounded history ring consumed
/// by the metrics sampler / classifier.
#[derive(Clone, Debug)]
pub(crate) struct TaskTiming {
    pub(crate) exec_ms: Option<f64>,
    pub(crate) queue_wait_ms: Option<f64>,
    pub(crate) complexity: Option<TaskComplexity>,
    pub(crate) failed: bool,
}

/// Implemented by the controller so the executor can nudge it to sample
/// on demand, without the executor holding a strong reference back to the
/// controller's full type.
pub(crate) trait TickNotifier: Send + Sync {
    fn notify_task_completed(&self);
}

struct Inner {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: AtomicUsize,
    next_worker_index: AtomicUsize,
    max_workers: usize,

    memory: Arc<MemoryManager>,
    stats: Arc<Stats>,
    gate: Arc<LogGate>,

    task_history: Mutex<VecDeque<TaskTiming>>,
    tick_notifier: ArcSwapOption<dyn TickNotifier>,
    completed_since_tick: AtomicU64,
    on_demand_threshold: AtomicU64,

    shutdown: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the worker threads, the dispatch queue, and the timeout reaper.
/// Cheap to clone: internally an `Arc`, so the reaper and every worker
/// thread can hold a handle back without the executor itself needing to be
/// wrapped by its callers.
#[derive(Clone)]
pub(crate) struct Executor(Arc<Inner>);

/// Returns the hardware-aware ceiling on worker count: 4x the detected
/// concurrency, capped at 512.
pub(crate) fn max_workers() -> usize {
    (num_cpus::get() * 4).min(512)
}

impl Executor {
    pub(crate) fn new(
        initial_workers: usize,
        memory: Arc<MemoryManager>,
        stats: Arc<Stats>,
        gate: Arc<LogGate>,
    ) -> Self {
        let (sender, receiver) = channel::unbounded();
        let max = max_workers();
        let initial_workers = initial_workers.clamp(1, max);

        let inner = Arc::new(Inner {
            sender,
            receiver,
            workers: Mutex::new(Vec::with_capacity(initial_workers)),
            worker_count: AtomicUsize::new(0),
            next_worker_index: AtomicUsize::new(0),
            max_workers: max,
            memory,
            stats,
            gate,
            task_history: Mutex::new(VecDeque::with_capacity(TASK_HISTORY_CAP)),
            tick_notifier: ArcSwapOption::from(None),
            completed_since_tick: AtomicU64::new(0),
            on_demand_threshold: AtomicU64::new(50),
            shutdown: AtomicBool::new(false),
            reaper: Mutex::new(None),
        });

        let executor = Executor(inner);
        for _ in 0..initial_workers {
            executor.spawn_worker();
        }
        executor.stats_set_worker_count(initial_workers);
        executor.start_reaper();
        executor
    }

    fn stats_set_worker_count(&self, n: usize) {
        self.0.worker_count.store(n, Ordering::Relaxed);
        self.0.stats.set_worker_count(n);
    }

    fn spawn_worker(&self) {
        let index = self.0.next_worker_index.fetch_add(1, Ordering::Relaxed);
        let inner = self.0.clone();
        let handle = std::thread::Builder::new()
            .name(format!("tasklet-worker-{index}"))
            .spawn(move || worker_loop(index, inner))
            .expect("failed to spawn worker thread");
        self.0.workers.lock().unwrap().push(handle);
    }

    fn start_reaper(&self) {
        let inner = self.0.clone();
        let handle = std::thread::Builder::new()
            .name("tasklet-reaper".to_string())
            .spawn(move || reaper_loop(inner))
            .expect("failed to spawn reaper thread");
        *self.0.reaper.lock().unwrap() = Some(handle);
    }

    pub(crate) fn register_tick_notifier(&self, notifier: Arc<dyn TickNotifier>) {
        self.0.tick_notifier.store(Some(notifier));
    }

    pub(crate) fn set_on_demand_threshold(&self, n: u64) {
        self.0.on_demand_threshold.store(n.max(1), Ordering::Relaxed);
    }

    pub(crate) fn spawn(&self, closure: Closure) -> Result<TaskId> {
        self.spawn_with(closure, 0, 0)
    }

    pub(crate) fn spawn_with(
        &self,
        closure: Closure,
        priority: i8,
        timeout_ms: u64,
    ) -> Result<TaskId> {
        if !self.0.memory.may_admit() {
            engine_log!(
                self.0.gate,
                LogLevel::Warn,
                "admission refused: system memory pressure"
            );
            return Err(EngineError::AdmissionRefused {
                reason: "system memory usage above configured limit".to_string(),
            });
        }

        let id = TaskId::new();
        let mut job = self.0.memory.acquire_job();
        job.task_id = Some(id);
        job.priority = priority;
        job.timeout_ms = timeout_ms;

        let record = Arc::new(TaskRecord::new(id, priority, timeout_ms));
        self.0.memory.register(id, record.clone());
        // Held for the task's full lifetime; released only once cleanup
        // reclaims the task, not at dispatch.
        self.0.memory.store_job(id, job);
        self.0.stats.record_created();

        if self.0.sender.send(Job::Run { record, closure }).is_err() {
            // The channel only closes once every worker's receiver is
            // dropped, which outlives any live `Executor` handle in
            // practice; treat it as a graceful unavailability rather than
            // panicking on what would otherwise be a logic bug.
            self.0.memory.unregister(id);
            engine_log!(
                self.0.gate,
                LogLevel::Error,
                "submit failed: worker channel closed"
            );
            return Err(EngineError::Unavailable {
                reason: "worker channel closed".to_string(),
            });
        }

        engine_log!(self.0.gate, LogLevel::Trace, "task {id} submitted");
        Ok(id)
    }

    pub(crate) fn submit_batch<F>(&self, n: usize, mut factory: F) -> Result<Vec<TaskId>>
    where
        F: FnMut(usize) -> Closure,
    {
        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            ids.push(self.spawn(factory(i))?);
        }
        Ok(ids)
    }

    fn lookup(&self, id: TaskId) -> Result<Arc<TaskRecord>> {
        self.0.memory.lookup(id).ok_or(EngineError::NotFound(id))
    }

    pub(crate) fn cancel(&self, id: TaskId) -> Result<bool> {
        let record = self.lookup(id)?;
        let cancelled = record.cancel();
        if cancelled {
            self.0.stats.record_cancelled();
            self.0.memory.mark_for_cleanup(id);
        }
        Ok(cancelled)
    }

    pub(crate) fn join(&self, id: TaskId) -> Result<()> {
        self.lookup(id)?.join();
        Ok(())
    }

    /// Blocks until every task registered at call entry reaches a terminal
    /// state. Tasks submitted after entry are not waited on.
    pub(crate) fn join_all(&self) {
        for id in self.0.memory.active_ids() {
            if let Some(record) = self.0.memory.lookup(id) {
                record.join();
            }
        }
    }

    pub(crate) fn join_batch(&self, ids: &[TaskId]) -> Result<()> {
        for &id in ids {
            self.lookup(id)?.join();
        }
        Ok(())
    }

    pub(crate) fn get_result(&self, id: TaskId) -> Result<Vec<u8>> {
        Ok(self.lookup(id)?.get_result())
    }

    pub(crate) fn has_error(&self, id: TaskId) -> Result<bool> {
        Ok(self.lookup(id)?.has_error())
    }

    pub(crate) fn get_error(&self, id: TaskId) -> Result<String> {
        Ok(self.lookup(id)?.get_error())
    }

    pub(crate) fn is_finished(&self, id: TaskId) -> Result<bool> {
        Ok(self.lookup(id)?.is_finished())
    }

    /// (queue wait, execution duration) in milliseconds, each `None` until
    /// the task has reached the corresponding point in its lifecycle.
    pub(crate) fn task_timing_ms(&self, id: TaskId) -> Result<(Option<f64>, Option<f64>)> {
        let record = self.lookup(id)?;
        Ok((record.queue_wait_ms(), record.exec_duration_ms()))
    }

    pub(crate) fn get_worker_count(&self) -> usize {
        self.0.worker_count.load(Ordering::Relaxed)
    }

    pub(crate) fn max_worker_count(&self) -> usize {
        self.0.max_workers
    }

    /// No-op for the current count; `ConfigurationInvalid` outside
    /// `[1, max]` without mutating state. Shrinking asks the excess workers
    /// to stop once their current job (if any) finishes.
    pub(crate) fn set_worker_count(&self, n: usize) -> Result<()> {
        let current = self.get_worker_count();
        if n == current {
            return Ok(());
        }
        if n < 1 || n > self.0.max_workers {
            return Err(EngineError::ConfigurationInvalid {
                reason: format!("worker count {n} outside [1, {}]", self.0.max_workers),
            });
        }

        if n > current {
            for _ in current..n {
                self.spawn_worker();
            }
        } else {
            for _ in n..current {
                let _ = self.0.sender.send(Job::Shutdown);
            }
            self.0.workers.lock().unwrap().retain(|h| !h.is_finished());
        }
        self.stats_set_worker_count(n);
        engine_log!(self.0.gate, LogLevel::Info, "worker count set to {n}");
        Ok(())
    }

    pub(crate) fn queue_length(&self) -> usize {
        self.0.sender.len()
    }

    pub(crate) fn recent_avg_queue_wait_ms(&self) -> f64 {
        let history = self.0.task_history.lock().unwrap();
        let (sum, count) = history
            .iter()
            .filter_map(|t| t.queue_wait_ms)
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    pub(crate) fn task_history_snapshot(&self) -> Vec<TaskTiming> {
        self.0.task_history.lock().unwrap().iter().cloned().collect()
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        self.0.stats.snapshot(self.0.memory.active_len() as u64)
    }

    /// Signals every worker and the reaper to stop and joins them. Explicit
    /// rather than left to `Drop`: each worker and the reaper hold their own
    /// `Arc<Inner>` clone for the lifetime of their loop, so the shared
    /// strong count never reaches zero on its own.
    pub(crate) fn shutdown(&self) {
        self.0.shutdown.store(true, Ordering::Relaxed);
        let worker_count = self.0.workers.lock().unwrap().len();
        for _ in 0..worker_count {
            let _ = self.0.sender.send(Job::Shutdown);
        }
        for handle in self.0.workers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.0.reaper.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(worker_index: usize, inner: Arc<Inner>) {
    while let Ok(job) = inner.receiver.recv() {
        let (record, closure) = match job {
            Job::Shutdown => break,
            Job::Run { record, closure } => (record, closure),
        };

        inner.memory.mark_job_dispatched(record.id());

        record.mark_started();
        engine_log!(
            inner.gate,
            LogLevel::Trace,
            "task {} dispatched on worker {worker_index}",
            record.id()
        );

        let outcome = catch_unwind(AssertUnwindSafe(closure)).unwrap_or_else(|panic| {
            Err(panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string()))
        });

        let failed_or_timed_out_already = record.is_finished();
        record.mark_completed(outcome);

        if !failed_or_timed_out_already {
            if record.has_error() {
                inner.stats.record_failed();
            } else {
                inner.stats.record_completed();
            }
            if let Some(ms) = record.exec_duration_ms() {
                inner.stats.add_exec_time_ms(ms as u64);
            }
        }
        inner.stats.record_worker_task(worker_index);

        {
            let mut history = inner.task_history.lock().unwrap();
            if history.len() >= TASK_HISTORY_CAP {
                history.pop_front();
            }
            history.push_back(TaskTiming {
                exec_ms: record.exec_duration_ms(),
                queue_wait_ms: record.queue_wait_ms(),
                complexity: record.complexity(),
                failed: record.has_error(),
            });
        }

        if !failed_or_timed_out_already {
            inner.memory.mark_for_cleanup(record.id());
        }

        let since = inner.completed_since_tick.fetch_add(1, Ordering::Relaxed) + 1;
        if since >= inner.on_demand_threshold.load(Ordering::Relaxed) {
            inner.completed_since_tick.store(0, Ordering::Relaxed);
            if let Some(notifier) = inner.tick_notifier.load_full() {
                notifier.notify_task_completed();
            }
        }
    }
}

fn reaper_loop(inner: Arc<Inner>) {
    while !inner.shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(REAPER_INTERVAL_MS));
        for id in inner.memory.active_ids() {
            if let Some(record) = inner.memory.lookup(id) {
                if let Some(deadline) = record.deadline() {
                    if Instant::now() >= deadline && !record.is_finished() {
                        if record.mark_timed_out() {
                            inner.stats.record_failed();
                            inner.memory.mark_for_cleanup(id);
                            engine_log!(
                                inner.gate,
                                LogLevel::Warn,
                                "task {id} exceeded its deadline"
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn new_executor(workers: usize) -> Executor {
        let memory = Arc::new(MemoryManager::new(100, 4, 8));
        let stats = Arc::new(Stats::new(workers));
        let gate = Arc::new(LogGate::new(LogLevel::Off));
        Executor::new(workers, memory, stats, gate)
    }

    #[test]
    fn single_task_completes_and_is_joinable() {
        let exec = new_executor(2);
        let id = exec.spawn(Box::new(|| Ok(b"42".to_vec()))).unwrap();
        exec.join(id).unwrap();
        assert!(exec.is_finished(id).unwrap());
        assert_eq!(exec.get_result(id).unwrap(), b"42".to_vec());
        assert!(!exec.has_error(id).unwrap());
    }

    #[test]
    fn failing_closure_is_captured_not_propagated() {
        let exec = new_executor(1);
        let id = exec
            .spawn(Box::new(|| Err("boom".to_string())))
            .unwrap();
        exec.join(id).unwrap();
        assert!(exec.has_error(id).unwrap());
        assert_eq!(exec.get_error(id).unwrap(), "boom");
        assert_eq!(exec.get_result(id).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn panicking_closure_becomes_a_failed_task() {
        let exec = new_executor(1);
        let id = exec
            .spawn(Box::new(|| panic!("kaboom")))
            .unwrap();
        exec.join(id).unwrap();
        assert!(exec.has_error(id).unwrap());
    }

    #[test]
    fn batch_of_tasks_all_complete() {
        let exec = new_executor(4);
        let counter = Arc::new(AtomicU32::new(0));
        let ids = exec
            .submit_batch(50, |i| {
                let c = counter.clone();
                Box::new(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                    Ok(i.to_string().into_bytes())
                })
            })
            .unwrap();
        exec.join_batch(&ids).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 50);
        for id in ids {
            assert!(exec.is_finished(id).unwrap());
        }
    }

    #[test]
    fn unknown_id_is_not_found() {
        let exec = new_executor(1);
        let bogus = TaskId::new();
        assert!(matches!(
            exec.get_result(bogus),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn cancelling_a_pending_task_counts_toward_stats() {
        let exec = new_executor(1);
        let (tx, rx) = crossbeam::channel::bounded::<()>(0);
        let busy = exec
            .spawn(Box::new(move || {
                let _ = rx.recv();
                Ok(Vec::new())
            }))
            .unwrap();
        let pending = exec.spawn(Box::new(|| Ok(Vec::new()))).unwrap();

        assert!(exec.cancel(pending).unwrap());
        let _ = tx.send(());
        exec.join(busy).unwrap();

        assert_eq!(exec.stats().cancelled, 1);
    }

    #[test]
    fn timeout_marks_task_failed_without_aborting_closure() {
        let exec = new_executor(1);
        let id = exec
            .spawn_with(
                Box::new(|| {
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(Vec::new())
                }),
                0,
                20,
            )
            .unwrap();
        exec.join(id).unwrap();
        assert!(exec.has_error(id).unwrap());
        assert!(exec.get_error(id).unwrap().contains("deadline"));
    }

    #[test]
    fn set_worker_count_rejects_out_of_range() {
        let exec = new_executor(2);
        assert!(exec.set_worker_count(0).is_err());
        assert!(exec.set_worker_count(exec.max_worker_count() + 1).is_err());
        assert_eq!(exec.get_worker_count(), 2);
    }

    #[test]
    fn set_worker_count_same_value_is_a_noop() {
        let exec = new_executor(2);
        exec.set_worker_count(2).unwrap();
        assert_eq!(exec.get_worker_count(), 2);
    }

    #[test]
    fn set_worker_count_grows_and_shrinks() {
        let exec = new_executor(1);
        exec.set_worker_count(3).unwrap();
        assert_eq!(exec.get_worker_count(), 3);
        let ids = exec
            .submit_batch(20, |_| Box::new(|| Ok(Vec::new())))
            .unwrap();
        exec.join_batch(&ids).unwrap();
        exec.set_worker_count(1).unwrap();
        assert_eq!(exec.get_worker_count(), 1);
    }
}
