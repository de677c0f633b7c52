use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How far back the submission-rate window looks when the recommendation
/// engine estimates recent throughput for pool sizing.
const SUBMISSION_WINDOW: Duration = Duration::from_secs(60);

/// Stable snapshot of the counters below, read in one pass so that the
/// derived fields (`avg_exec_ms`, `success_rate_percent`) are consistent
/// with the raw counts they were computed from.
#[derive(Clone, Debug, Default)]
pub struct SchedulerStats {
    pub active: u64,
    pub created: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub workers: usize,
    pub total_exec_ms: u64,
    pub avg_exec_ms: f64,
    pub success_rate_percent: f64,
    pub per_worker: Vec<u64>,
}

/// Lock-minimal counters for created/completed/failed/active tasks and
/// timing aggregates. Counters are monotonic lifetime totals; `active` is a
/// point-in-time estimate of tasks that have not yet been created-completed
/// (see the accounting note in DESIGN.md for how the testable accounting
/// identity is interpreted against monotonic totals).
pub(crate) struct Stats {
    created: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    worker_count: AtomicUsize,
    total_exec_ms: AtomicU64,
    per_worker: Mutex<Vec<AtomicU64>>,
    submission_times: Mutex<VecDeque<Instant>>,
}

impl Stats {
    pub(crate) fn new(initial_workers: usize) -> Self {
        Stats {
            created: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            worker_count: AtomicUsize::new(initial_workers),
            total_exec_ms: AtomicU64::new(0),
            per_worker: Mutex::new((0..initial_workers).map(|_| AtomicU64::new(0)).collect()),
            submission_times: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut times = self.submission_times.lock().unwrap();
        times.push_back(now);
        while times
            .front()
            .map(|t| now.duration_since(*t) > SUBMISSION_WINDOW)
            .unwrap_or(false)
        {
            times.pop_front();
        }
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_exec_time_ms(&self, ms: u64) {
        self.total_exec_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub(crate) fn record_worker_task(&self, worker_index: usize) {
        let guard = self.per_worker.lock().unwrap();
        if let Some(counter) = guard.get(worker_index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn set_worker_count(&self, n: usize) {
        self.worker_count.store(n, Ordering::Relaxed);
        let mut guard = self.per_worker.lock().unwrap();
        while guard.len() < n {
            guard.push(AtomicU64::new(0));
        }
    }

    /// Recent submissions per second, averaged over the submission window.
    pub(crate) fn recent_submission_rate(&self) -> f64 {
        let times = self.submission_times.lock().unwrap();
        if times.is_empty() {
            return 0.0;
        }
        let span = times
            .back()
            .unwrap()
            .duration_since(*times.front().unwrap())
            .as_secs_f64()
            .max(1.0);
        times.len() as f64 / span
    }

    pub(crate) fn snapshot(&self, active: u64) -> SchedulerStats {
        let created = self.created.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let cancelled = self.cancelled.load(Ordering::Relaxed);
        let total_exec_ms = self.total_exec_ms.load(Ordering::Relaxed);
        let avg_exec_ms = if completed > 0 {
            total_exec_ms as f64 / completed as f64
        } else {
            0.0
        };
        let success_rate_percent = if created > 0 {
            100.0 * completed as f64 / created as f64
        } else {
            0.0
        };
        let per_worker = self
            .per_worker
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        SchedulerStats {
            active,
            created,
            completed,
            failed,
            cancelled,
            workers: self.worker_count.load(Ordering::Relaxed),
            total_exec_ms,
            avg_exec_ms,
            success_rate_percent,
            per_worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_and_success_rate_are_derived() {
        let s = Stats::new(2);
        s.record_created();
        s.record_created();
        s.record_completed();
        s.add_exec_time_ms(10);
        s.record_failed();
        let snap = s.snapshot(0);
        assert_eq!(snap.created, 2);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.avg_exec_ms, 10.0);
        assert_eq!(snap.success_rate_percent, 50.0);
    }

}
