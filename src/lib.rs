//! Embeddable adaptive task execution engine: a thread-pool executor with a
//! weak-reference lifecycle manager and a self-tuning controller that
//! samples runtime metrics, classifies the workload, and adjusts worker
//! count, timeouts, pool sizing and cleanup cadence in response.

mod classifier;
mod config;
mod controller;
mod error;
mod executor;
mod logging;
mod memory;
mod metrics;
mod object_pool;
mod recommend;
mod stats;
mod task;
mod unique_id;

mod engine;

pub use classifier::WorkloadPattern;
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use engine::{Engine, SystemInfo};
pub use logging::LogLevel;
pub use memory::MemoryStats;
pub use metrics::MetricsSample;
pub use object_pool::PoolStats;
pub use recommend::{Recommendation, RecommendationSet, RecommendationStrategy};
pub use stats::SchedulerStats;
pub use task::{TaskComplexity, TaskStatus};
pub use unique_id::TaskId;
