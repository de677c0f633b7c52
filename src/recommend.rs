use crate::classifier::WorkloadPattern;
use crate::executor::max_workers;
use crate::metrics::{load_balance_score, MetricsSample};
use crate::stats::SchedulerStats;

/// Tuning aggressiveness, set at construction time and applied as a
/// multiplier to every axis' adjustment magnitude without changing its
/// sign or confidence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecommendationStrategy {
    Conservative,
    Moderate,
    Aggressive,
}

impl RecommendationStrategy {
    fn factor(self) -> f64 {
        match self {
            RecommendationStrategy::Conservative => 0.5,
            RecommendationStrategy::Moderate => 1.0,
            RecommendationStrategy::Aggressive => 1.5,
        }
    }
}

/// One proposed value on a single configuration axis.
#[derive(Clone, Debug)]
pub struct Recommendation<T> {
    pub value: T,
    pub should_apply: bool,
    pub confidence: f64,
}

impl<T> Recommendation<T> {
    fn noop(value: T) -> Self {
        Recommendation {
            value,
            should_apply: false,
            confidence: 0.0,
        }
    }
}

/// Full bundle produced by one controller tick.
#[derive(Clone, Debug)]
pub struct RecommendationSet {
    pub worker_count: Recommendation<usize>,
    pub timeout_ms: Recommendation<u64>,
    pub priority_bias: Recommendation<i8>,
    pub batch_size: Recommendation<usize>,
    pub pool_initial: Recommendation<usize>,
    pub pool_max: Recommendation<usize>,
    pub cleanup_interval_ms: Recommendation<u64>,
    pub load_balance: Recommendation<Vec<u64>>,
    pub overall_confidence: f64,
}

pub(crate) fn recommend(
    sample: &MetricsSample,
    stats: &SchedulerStats,
    submission_rate: f64,
    current_timeout_ms: u64,
    current_cleanup_interval_ms: u64,
    current_pool_initial: usize,
    current_pool_max: usize,
    strategy: RecommendationStrategy,
) -> RecommendationSet {
    let max = max_workers();
    let f = strategy.factor();

    let worker_count = recommend_worker_count(sample, stats.workers, max, f);
    let timeout_ms = recommend_timeout(sample, current_timeout_ms, f);
    let priority_bias = recommend_priority_bias(sample, f);
    let batch_size = recommend_batch_size(sample);
    let (pool_initial, pool_max) =
        recommend_pool_sizing(submission_rate, current_pool_initial, current_pool_max);
    let cleanup_interval_ms = recommend_cleanup_interval(sample, current_cleanup_interval_ms);
    let load_balance = recommend_load_balance(&stats.per_worker);

    let all = [
        worker_count.should_apply.then_some(worker_count.confidence),
        timeout_ms.should_apply.then_some(timeout_ms.confidence),
        priority_bias
            .should_apply
            .then_some(priority_bias.confidence),
        batch_size.should_apply.then_some(batch_size.confidence),
        pool_initial.should_apply.then_some(pool_initial.confidence),
        cleanup_interval_ms
            .should_apply
            .then_some(cleanup_interval_ms.confidence),
        load_balance.should_apply.then_some(load_balance.confidence),
    ];
    let applied: Vec<f64> = all.into_iter().flatten().collect();
    let overall_confidence = if applied.is_empty() {
        0.0
    } else {
        applied.iter().sum::<f64>() / applied.len() as f64
    };

    RecommendationSet {
        worker_count,
        timeout_ms,
        priority_bias,
        batch_size,
        pool_initial,
        pool_max,
        cleanup_interval_ms,
        load_balance,
        overall_confidence,
    }
}

fn recommend_worker_count(
    sample: &MetricsSample,
    current: usize,
    max: usize,
    factor: f64,
) -> Recommendation<usize> {
    let mut step: i64 = 0;
    let mut confidence = 0.0;

    if sample.worker_utilisation > 0.90 && current < max {
        step = 1;
        confidence = 0.8;
        step += match sample.pattern {
            WorkloadPattern::IoIntensive => step,
            WorkloadPattern::CpuIntensive => 1,
            _ => 0,
        };
    } else if sample.worker_utilisation < 0.30 && current > 1 {
        step = -1;
        confidence = 0.7;
        if sample.pattern == WorkloadPattern::MemoryIntensive {
            step *= 2;
        }
    }

    if step == 0 {
        return Recommendation::noop(current);
    }

    let scaled = (step as f64 * factor).round() as i64;
    let scaled = if scaled == 0 {
        step.signum()
    } else {
        scaled
    };
    let proposed = (current as i64 + scaled).clamp(1, max as i64) as usize;

    Recommendation {
        should_apply: proposed != current,
        value: proposed,
        confidence,
    }
}

fn recommend_timeout(
    sample: &MetricsSample,
    current_ms: u64,
    factor: f64,
) -> Recommendation<u64> {
    let mut base = sample.complexity.base_timeout_ms() as f64;
    let failure_rate = 100.0 - sample.success_rate_percent;
    if failure_rate > 10.0 {
        base *= 1.5;
    }
    let adjusted = current_ms as f64 + (base - current_ms as f64) * factor;
    let proposed = adjusted.max(1.0) as u64;

    let should_apply = proposed.abs_diff(current_ms) > 5_000;
    Recommendation {
        value: if should_apply { proposed } else { current_ms },
        should_apply,
        confidence: 0.6,
    }
}

fn recommend_priority_bias(sample: &MetricsSample, factor: f64) -> Recommendation<i8> {
    let base: i8 = match sample.pattern {
        WorkloadPattern::Burst => 10,
        WorkloadPattern::CpuIntensive => 5,
        WorkloadPattern::IoIntensive => 3,
        WorkloadPattern::MemoryIntensive => 1,
        WorkloadPattern::Mixed | WorkloadPattern::Steady => 0,
    };
    let queue_adjustment: i8 = if sample.queue_length > 100 {
        2
    } else if sample.queue_length < 10 {
        -1
    } else {
        0
    };
    let scaled = ((base + queue_adjustment) as f64 * factor).round() as i64;
    let value = scaled.clamp(-10, 10) as i8;
    Recommendation {
        value,
        should_apply: value != 0,
        confidence: 0.5,
    }
}

fn recommend_batch_size(sample: &MetricsSample) -> Recommendation<usize> {
    if sample.pattern == WorkloadPattern::Burst {
        return Recommendation {
            value: 25,
            should_apply: true,
            confidence: 0.6,
        };
    }
    if sample.pattern == WorkloadPattern::MemoryIntensive {
        return Recommendation {
            value: 5,
            should_apply: sample.queue_length > 20,
            confidence: 0.5,
        };
    }
    if sample.avg_exec_ms < 10.0 && sample.avg_exec_ms > 0.0 {
        let size = (1000.0 / sample.avg_exec_ms).floor().min(50.0) as usize;
        return Recommendation {
            value: size,
            should_apply: size > 5,
            confidence: 0.6,
        };
    }
    Recommendation::noop(1)
}

fn recommend_pool_sizing(
    submission_rate: f64,
    current_initial: usize,
    current_max: usize,
) -> (Recommendation<usize>, Recommendation<usize>) {
    let proposed_initial = (submission_rate.ceil() as usize).clamp(1, 4096);
    let proposed_max = proposed_initial.max(current_max).max(current_initial);

    let initial_changes = proposed_initial != current_initial;
    let max_changes = proposed_max != current_max;

    (
        Recommendation {
            value: proposed_initial,
            should_apply: initial_changes,
            confidence: 0.5,
        },
        Recommendation {
            value: proposed_max,
            should_apply: max_changes,
            confidence: 0.5,
        },
    )
}

fn recommend_cleanup_interval(
    sample: &MetricsSample,
    current_ms: u64,
) -> Recommendation<u64> {
    let target: u64 = match sample.pattern {
        WorkloadPattern::Burst => 1_000,
        WorkloadPattern::Steady => 10_000,
        _ => current_ms,
    };
    if target == current_ms {
        return Recommendation::noop(current_ms);
    }
    // Step halfway toward the target rather than jumping straight there.
    let proposed = current_ms.saturating_add_signed(
        ((target as i64 - current_ms as i64) / 2).clamp(-current_ms as i64, i64::MAX),
    );
    let proposed = proposed.max(1);
    Recommendation {
        should_apply: proposed != current_ms,
        value: proposed,
        confidence: 0.5,
    }
}

fn recommend_load_balance(per_worker: &[u64]) -> Recommendation<Vec<u64>> {
    if per_worker.len() <= 1 {
        return Recommendation::noop(per_worker.to_vec());
    }
    let score = load_balance_score(per_worker);
    if score >= 70.0 {
        return Recommendation::noop(per_worker.to_vec());
    }
    let total: u64 = per_worker.iter().sum();
    let share = total / per_worker.len() as u64;
    let mut split = vec![share; per_worker.len()];
    let remainder = (total % per_worker.len() as u64) as usize;
    for slot in split.iter_mut().take(remainder) {
        *slot += 1;
    }
    Recommendation {
        value: split,
        should_apply: true,
        confidence: 0.8,
    }
}
