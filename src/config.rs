use std::sync::atomic::{AtomicI8, AtomicU64, AtomicUsize, Ordering};

use crate::logging::LogLevel;
use crate::recommend::RecommendationStrategy;

/// Construction-time parameters gathered in one place, analogous to the
/// constants the teacher collects in its own config module.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub initial_workers: usize,
    pub pool_initial: usize,
    pub pool_max: usize,
    pub memory_limit_percent: u8,
    pub default_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
    pub controller_interval_ms: u64,
    pub on_demand_threshold: u64,
    pub strategy: RecommendationStrategy,
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            initial_workers: num_cpus::get().max(1),
            pool_initial: 16,
            pool_max: 256,
            memory_limit_percent: 90,
            default_timeout_ms: 0,
            cleanup_interval_ms: 5_000,
            controller_interval_ms: 5_000,
            on_demand_threshold: 50,
            strategy: RecommendationStrategy::Moderate,
            log_level: LogLevel::Info,
        }
    }
}

/// Live knobs that don't already have a natural owner elsewhere (worker
/// count lives on the executor, memory limit and cleanup interval on the
/// memory manager, log level on the logging gate). Compound updates — an
/// applied [Recommendation](crate::recommend::Recommendation) set touching
/// more than one field — take `apply` to update every field under one
/// critical section.
pub(crate) struct Config {
    default_timeout_ms: AtomicU64,
    priority_bias: AtomicI8,
    batch_size: AtomicUsize,
    pool_initial: AtomicUsize,
    pool_max: AtomicUsize,
    strategy: RecommendationStrategy,
}

impl Config {
    pub(crate) fn new(
        default_timeout_ms: u64,
        pool_initial: usize,
        pool_max: usize,
        strategy: RecommendationStrategy,
    ) -> Self {
        Config {
            default_timeout_ms: AtomicU64::new(default_timeout_ms),
            priority_bias: AtomicI8::new(0),
            batch_size: AtomicUsize::new(1),
            pool_initial: AtomicUsize::new(pool_initial),
            pool_max: AtomicUsize::new(pool_max),
            strategy,
        }
    }

    pub(crate) fn pool_bounds(&self) -> (usize, usize) {
        (
            self.pool_initial.load(Ordering::Relaxed),
            self.pool_max.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn set_pool_bounds(&self, initial: usize, max: usize) {
        self.pool_initial.store(initial, Ordering::Relaxed);
        self.pool_max.store(max, Ordering::Relaxed);
    }

    pub(crate) fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn priority_bias(&self) -> i8 {
        self.priority_bias.load(Ordering::Relaxed)
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    pub(crate) fn strategy(&self) -> RecommendationStrategy {
        self.strategy
    }

    /// Applies the axes a controller tick is allowed to push straight into
    /// configuration (timeout, priority bias, batch size). Worker count,
    /// cleanup interval and pool bounds are applied directly to their
    /// owning components instead, not mirrored here.
    pub(crate) fn apply_tuning(&self, timeout_ms: u64, priority_bias: i8, batch_size: usize) {
        self.default_timeout_ms.store(timeout_ms, Ordering::Relaxed);
        self.priority_bias.store(priority_bias, Ordering::Relaxed);
        self.batch_size.store(batch_size, Ordering::Relaxed);
    }
}
