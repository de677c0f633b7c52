use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use crate::classifier::{classify_complexity, classify_pattern, WorkloadPattern};
use crate::executor::Executor;
use crate::memory::MemoryManager;
use crate::stats::Stats;
use crate::task::TaskComplexity;

/// Default bound on the metrics history ring.
pub(crate) const DEFAULT_HISTORY_CAP: usize = 100;

/// Snapshot captured at a sampling tick.
#[derive(Clone, Debug)]
pub struct MetricsSample {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub worker_utilisation: f64,
    pub throughput: f64,
    pub throughput_trend: f64,
    pub avg_queue_wait_ms: f64,
    pub avg_exec_ms: f64,
    pub success_rate_percent: f64,
    pub queue_length: usize,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub pattern: WorkloadPattern,
    pub complexity: TaskComplexity,
    pub timestamp: Instant,
}

struct ThroughputWindow {
    last_sample_at: Option<Instant>,
    last_completed: u64,
    last_throughput: f64,
}

/// Periodic snapshot of executor + system state, kept in a bounded ring.
pub(crate) struct MetricsSampler {
    history: Mutex<VecDeque<MetricsSample>>,
    window: Mutex<ThroughputWindow>,
    cap: usize,
}

impl MetricsSampler {
    pub(crate) fn new(cap: usize) -> Self {
        MetricsSampler {
            history: Mutex::new(VecDeque::with_capacity(cap)),
            window: Mutex::new(ThroughputWindow {
                last_sample_at: None,
                last_completed: 0,
                last_throughput: 0.0,
            }),
            cap,
        }
    }

    pub(crate) fn sample(
        &self,
        stats: &Stats,
        memory: &MemoryManager,
        executor: &Executor,
    ) -> MetricsSample {
        let active = memory.active_len() as u64;
        let snap = stats.snapshot(active);
        let now = Instant::now();
        let workers = snap.workers.max(1);
        let worker_utilisation = (snap.active as f64 / workers as f64).max(0.0);
        let cpu_percent = memory.cpu_percent_estimate(worker_utilisation);
        let mem_percent = memory.mem_percent();
        let queue_length = executor.queue_length();

        let (throughput, throughput_trend) = {
            let mut w = self.window.lock().unwrap();
            let throughput = match w.last_sample_at {
                Some(prev) => {
                    let dt = now.duration_since(prev).as_secs_f64().max(0.001);
                    (snap.completed.saturating_sub(w.last_completed)) as f64 / dt
                }
                None => 0.0,
            };
            let trend = if w.last_throughput > 0.0 {
                (throughput / w.last_throughput).max(0.1)
            } else {
                1.0
            };
            w.last_sample_at = Some(now);
            w.last_completed = snap.completed;
            w.last_throughput = throughput;
            (throughput, trend)
        };

        let mut sample = MetricsSample {
            cpu_percent,
            mem_percent,
            worker_utilisation,
            throughput,
            throughput_trend,
            avg_queue_wait_ms: executor.recent_avg_queue_wait_ms(),
            avg_exec_ms: snap.avg_exec_ms,
            success_rate_percent: snap.success_rate_percent,
            queue_length,
            active: snap.active,
            completed: snap.completed,
            failed: snap.failed,
            pattern: WorkloadPattern::Mixed,
            complexity: classify_complexity(snap.avg_exec_ms),
            timestamp: now,
        };
        sample.pattern = classify_pattern(&sample);

        let mut hist = self.history.lock().unwrap();
        if hist.len() >= self.cap {
            hist.pop_front();
        }
        hist.push_back(sample.clone());
        sample
    }

    pub(crate) fn history(&self) -> Vec<MetricsSample> {
        self.history.lock().unwrap().iter().cloned().collect()
    }
}

/// `100 - variance proxy`, computed as a coefficient-of-variation score
/// across recent per-worker completed-task counts.
pub(crate) fn load_balance_score(per_worker: &[u64]) -> f64 {
    if per_worker.is_empty() {
        return 100.0;
    }
    let mean = per_worker.iter().sum::<u64>() as f64 / per_worker.len() as f64;
    if mean <= 0.0 {
        return 100.0;
    }
    let variance = per_worker
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / per_worker.len() as f64;
    let coefficient_of_variation = variance.sqrt() / mean;
    (100.0 - coefficient_of_variation * 100.0).clamp(0.0, 100.0)
}
