use crate::metrics::MetricsSample;
use crate::task::TaskComplexity;

/// Classification label describing recent workload behaviour.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WorkloadPattern {
    CpuIntensive,
    IoIntensive,
    MemoryIntensive,
    Mixed,
    Burst,
    Steady,
}

/// Derives a workload pattern from a metrics sample, per the decision order
/// in the recommendation engine's design: cpu-bound first, then io-bound,
/// then memory-bound, then throughput-trend-based burst/steady, else mixed.
pub(crate) fn classify_pattern(sample: &MetricsSample) -> WorkloadPattern {
    if sample.cpu_percent >= 80.0 && sample.mem_percent < 50.0 {
        return WorkloadPattern::CpuIntensive;
    }

    let short_task_fraction = (1.0 - sample.avg_exec_ms / 1000.0).clamp(0.0, 1.0);
    if short_task_fraction > 0.70 && sample.cpu_percent < 50.0 {
        return WorkloadPattern::IoIntensive;
    }

    if sample.mem_percent > 70.0 {
        return WorkloadPattern::MemoryIntensive;
    }

    if sample.throughput_trend > 1.5 {
        return WorkloadPattern::Burst;
    }

    if (sample.throughput_trend - 1.0).abs() < 0.2 {
        return WorkloadPattern::Steady;
    }

    WorkloadPattern::Mixed
}

/// Complexity is derived straight from average completed-task execution
/// time; kept here as a thin re-export point since the classifier is where
/// callers look for both pattern and complexity together.
pub(crate) fn classify_complexity(avg_exec_ms: f64) -> TaskComplexity {
    TaskComplexity::from_exec_ms(avg_exec_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sample(cpu: f64, mem: f64, trend: f64, avg_exec_ms: f64) -> MetricsSample {
        MetricsSample {
            cpu_percent: cpu,
            mem_percent: mem,
            worker_utilisation: 0.5,
            throughput: 10.0,
            throughput_trend: trend,
            avg_queue_wait_ms: 0.0,
            avg_exec_ms,
            success_rate_percent: 100.0,
            queue_length: 0,
            active: 0,
            completed: 0,
            failed: 0,
            pattern: WorkloadPattern::Mixed,
            complexity: TaskComplexity::Trivial,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn cpu_intensive_wins_when_cpu_high_and_mem_low() {
        assert_eq!(
            classify_pattern(&sample(90.0, 20.0, 1.0, 50.0)),
            WorkloadPattern::CpuIntensive
        );
    }

    #[test]
    fn memory_intensive_when_mem_high() {
        assert_eq!(
            classify_pattern(&sample(10.0, 80.0, 1.0, 50.0)),
            WorkloadPattern::MemoryIntensive
        );
    }

    #[test]
    fn io_intensive_when_short_tasks_and_low_cpu() {
        assert_eq!(
            classify_pattern(&sample(20.0, 20.0, 1.0, 1.0)),
            WorkloadPattern::IoIntensive
        );
    }

    #[test]
    fn burst_on_trend_spike() {
        assert_eq!(
            classify_pattern(&sample(40.0, 40.0, 2.0, 500.0)),
            WorkloadPattern::Burst
        );
    }

    #[test]
    fn steady_near_trend_one() {
        assert_eq!(
            classify_pattern(&sample(40.0, 40.0, 1.05, 500.0)),
            WorkloadPattern::Steady
        );
    }

    #[test]
    fn mixed_otherwise() {
        assert_eq!(
            classify_pattern(&sample(40.0, 40.0, 1.3, 500.0)),
            WorkloadPattern::Mixed
        );
    }
}
