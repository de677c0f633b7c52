use std::sync::Arc;

use crate::config::{Config, EngineConfig};
use crate::controller::Controller;
use crate::error::{EngineError, Result};
use crate::executor::{max_workers, Executor};
use crate::logging::{LogGate, LogLevel};
use crate::memory::{MemoryManager, MemoryStats};
use crate::metrics::{MetricsSample, MetricsSampler, DEFAULT_HISTORY_CAP};
use crate::recommend::RecommendationSet;
use crate::stats::{SchedulerStats, Stats};
use crate::unique_id::TaskId;

/// Aggregated snapshot of every observable surface, for a single call that
/// wants the whole picture at once.
#[derive(Clone, Debug)]
pub struct SystemInfo {
    pub scheduler: SchedulerStats,
    pub memory: MemoryStats,
    pub metrics_history: Vec<MetricsSample>,
    pub recommendations: Option<RecommendationSet>,
}

/// The engine's public library surface: submit work, wait on it, retrieve
/// results, and adjust the handful of live knobs an embedder controls
/// directly. Everything else (worker scaling, cleanup cadence, pool
/// sizing) is tuned automatically by the controller in the background.
pub struct Engine {
    executor: Executor,
    memory: Arc<MemoryManager>,
    config: Arc<Config>,
    gate: Arc<LogGate>,
    sampler: Arc<MetricsSampler>,
    controller: Arc<Controller>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Result<Engine> {
        let max = max_workers();
        if cfg.initial_workers < 1 || cfg.initial_workers > max {
            return Err(EngineError::ConfigurationInvalid {
                reason: format!("initial_workers must be within [1, {max}]"),
            });
        }
        if cfg.memory_limit_percent > 100 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "memory_limit_percent must be within [0, 100]".to_string(),
            });
        }

        let gate = Arc::new(LogGate::new(cfg.log_level));
        let stats = Arc::new(Stats::new(cfg.initial_workers));
        let memory = Arc::new(MemoryManager::new(
            cfg.memory_limit_percent,
            cfg.pool_initial,
            cfg.pool_max,
        ));
        memory.set_cleanup_interval_ms(cfg.cleanup_interval_ms);
        memory.spawn_janitor();

        let config = Arc::new(Config::new(
            cfg.default_timeout_ms,
            cfg.pool_initial,
            cfg.pool_max,
            cfg.strategy,
        ));

        let executor = Executor::new(cfg.initial_workers, memory.clone(), stats.clone(), gate.clone());
        executor.set_on_demand_threshold(cfg.on_demand_threshold);

        let sampler = Arc::new(MetricsSampler::new(DEFAULT_HISTORY_CAP));
        let controller = Controller::new(
            executor.clone(),
            memory.clone(),
            stats.clone(),
            config.clone(),
            gate.clone(),
            sampler.clone(),
            cfg.controller_interval_ms,
        );

        Ok(Engine {
            executor,
            memory,
            config,
            gate,
            sampler,
            controller,
        })
    }

    /// Submits a closure using the engine's current default priority and
    /// timeout (both subject to controller tuning between calls).
    pub fn submit<F>(&self, f: F) -> Result<TaskId>
    where
        F: FnOnce() -> std::result::Result<Vec<u8>, String> + Send + 'static,
    {
        self.submit_with(f, self.config.priority_bias(), self.config.default_timeout_ms())
    }

    pub fn submit_with<F>(&self, f: F, priority: i8, timeout_ms: u64) -> Result<TaskId>
    where
        F: FnOnce() -> std::result::Result<Vec<u8>, String> + Send + 'static,
    {
        self.executor.spawn_with(Box::new(f), priority, timeout_ms)
    }

    pub fn submit_batch<F>(&self, n: usize, factory: F) -> Result<Vec<TaskId>>
    where
        F: FnMut(usize) -> Box<dyn FnOnce() -> std::result::Result<Vec<u8>, String> + Send + 'static>,
    {
        self.executor.submit_batch(n, factory)
    }

    pub fn cancel(&self, id: TaskId) -> Result<bool> {
        self.executor.cancel(id)
    }

    pub fn join(&self, id: TaskId) -> Result<()> {
        self.executor.join(id)
    }

    pub fn join_all(&self) {
        self.executor.join_all();
    }

    pub fn join_batch(&self, ids: &[TaskId]) -> Result<()> {
        self.executor.join_batch(ids)
    }

    pub fn get_result(&self, id: TaskId) -> Result<Vec<u8>> {
        self.executor.get_result(id)
    }

    pub fn has_error(&self, id: TaskId) -> Result<bool> {
        self.executor.has_error(id)
    }

    pub fn get_error(&self, id: TaskId) -> Result<String> {
        self.executor.get_error(id)
    }

    pub fn is_finished(&self, id: TaskId) -> Result<bool> {
        self.executor.is_finished(id)
    }

    /// (queue wait, execution duration) in milliseconds, each `None` until
    /// the task has reached the corresponding point in its lifecycle.
    pub fn get_timing_ms(&self, id: TaskId) -> Result<(Option<f64>, Option<f64>)> {
        self.executor.task_timing_ms(id)
    }

    pub fn set_worker_count(&self, n: usize) -> Result<()> {
        self.executor.set_worker_count(n)
    }

    pub fn get_worker_count(&self) -> usize {
        self.executor.get_worker_count()
    }

    pub fn set_memory_limit_percent(&self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "memory_limit_percent must be within [0, 100]".to_string(),
            });
        }
        self.memory.set_memory_limit_percent(percent);
        Ok(())
    }

    pub fn set_cleanup_interval_ms(&self, ms: u64) -> Result<()> {
        if ms == 0 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "cleanup_interval_ms must be >= 1".to_string(),
            });
        }
        self.memory.set_cleanup_interval_ms(ms);
        Ok(())
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.gate.set(level);
    }

    pub fn register_recommendation_observer<F>(&self, observer: F)
    where
        F: Fn(&RecommendationSet) + Send + Sync + 'static,
    {
        self.controller.register_observer(Arc::new(observer));
    }

    pub fn get_stats(&self) -> SchedulerStats {
        self.executor.stats()
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    pub fn get_metrics_history(&self) -> Vec<MetricsSample> {
        self.sampler.history()
    }

    pub fn get_recommendations(&self) -> Option<RecommendationSet> {
        self.controller.latest_recommendations()
    }

    pub fn get_system_info(&self) -> SystemInfo {
        SystemInfo {
            scheduler: self.get_stats(),
            memory: self.get_memory_stats(),
            metrics_history: self.get_metrics_history(),
            recommendations: self.get_recommendations(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Order matters: the controller thread holds its own clones of the
        // executor and memory manager, so it must stop first or those two
        // shutdowns would race a tick still in flight.
        self.controller.shutdown();
        self.executor.shutdown();
        self.memory.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_engine() -> Engine {
        let mut cfg = EngineConfig::default();
        cfg.initial_workers = 2;
        cfg.pool_initial = 2;
        cfg.pool_max = 4;
        cfg.controller_interval_ms = 60_000;
        cfg.log_level = LogLevel::Off;
        Engine::new(cfg).unwrap()
    }

    #[test]
    fn single_fast_task_round_trips() {
        let engine = small_engine();
        let id = engine.submit(|| Ok(b"42".to_vec())).unwrap();
        engine.join(id).unwrap();
        assert!(engine.is_finished(id).unwrap());
        assert_eq!(engine.get_result(id).unwrap(), b"42".to_vec());
        assert!(!engine.has_error(id).unwrap());
        assert_eq!(engine.get_stats().completed, 1);
    }

    #[test]
    fn failing_task_reports_error() {
        let engine = small_engine();
        let id = engine.submit(|| Err("boom".to_string())).unwrap();
        engine.join(id).unwrap();
        assert!(engine.has_error(id).unwrap());
        assert_eq!(engine.get_error(id).unwrap(), "boom");
        assert_eq!(engine.get_result(id).unwrap(), Vec::<u8>::new());
        assert_eq!(engine.get_stats().failed, 1);
    }

    #[test]
    fn admission_refusal_at_zero_percent_limit() {
        let mut cfg = EngineConfig::default();
        cfg.initial_workers = 1;
        cfg.memory_limit_percent = 0;
        cfg.controller_interval_ms = 60_000;
        let engine = Engine::new(cfg).unwrap();
        let before = engine.get_stats().active;
        let result = engine.submit(|| Ok(Vec::new()));
        assert!(matches!(result, Err(EngineError::AdmissionRefused { .. })));
        assert_eq!(engine.get_stats().active, before);
    }

    #[test]
    fn rejects_out_of_range_construction() {
        let mut cfg = EngineConfig::default();
        cfg.initial_workers = max_workers() + 1;
        assert!(Engine::new(cfg).is_err());
    }
}
