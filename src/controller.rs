use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Config;
use crate::executor::{Executor, TickNotifier};
use crate::logging::{engine_log, LogGate, LogLevel};
use crate::memory::MemoryManager;
use crate::metrics::MetricsSampler;
use crate::recommend::{recommend, RecommendationSet};
use crate::stats::Stats;

pub(crate) type RecommendationObserver = Arc<dyn Fn(&RecommendationSet) + Send + Sync>;

struct Wakeup {
    condvar: Condvar,
    requested: Mutex<bool>,
}

/// Leaf handle the executor holds so it can nudge the controller to sample
/// on demand (job-triggered sampling, spec §4.9) without holding a strong
/// reference to the controller's full type — avoids an Executor<->Controller
/// reference cycle.
pub(crate) struct ControllerHandle {
    wakeup: Arc<Wakeup>,
}

impl TickNotifier for ControllerHandle {
    fn notify_task_completed(&self) {
        *self.wakeup.requested.lock().unwrap() = true;
        self.wakeup.condvar.notify_one();
    }
}

/// Runs the sample -> classify -> recommend -> apply loop on a single
/// cooperative timer thread, matching spec §4.9's single-timer-thread model.
pub(crate) struct Controller {
    wakeup: Arc<Wakeup>,
    interval_ms: AtomicU64,
    shutdown: Arc<AtomicBool>,
    observers: Mutex<Vec<RecommendationObserver>>,
    latest: Mutex<Option<RecommendationSet>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    pub(crate) fn new(
        executor: Executor,
        memory: Arc<MemoryManager>,
        stats: Arc<Stats>,
        config: Arc<Config>,
        gate: Arc<LogGate>,
        sampler: Arc<MetricsSampler>,
        interval_ms: u64,
    ) -> Arc<Controller> {
        let wakeup = Arc::new(Wakeup {
            condvar: Condvar::new(),
            requested: Mutex::new(false),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let controller = Arc::new(Controller {
            wakeup: wakeup.clone(),
            interval_ms: AtomicU64::new(interval_ms.max(1)),
            shutdown: shutdown.clone(),
            observers: Mutex::new(Vec::new()),
            latest: Mutex::new(None),
            thread: Mutex::new(None),
        });

        executor.register_tick_notifier(Arc::new(ControllerHandle {
            wakeup: wakeup.clone(),
        }));

        let loop_controller = controller.clone();
        let handle = std::thread::Builder::new()
            .name("tasklet-controller".to_string())
            .spawn(move || {
                controller_loop(
                    loop_controller,
                    executor,
                    memory,
                    stats,
                    config,
                    gate,
                    sampler,
                    wakeup,
                    shutdown,
                )
            })
            .expect("failed to spawn controller thread");
        *controller.thread.lock().unwrap() = Some(handle);

        controller
    }

    pub(crate) fn register_observer(&self, observer: RecommendationObserver) {
        self.observers.lock().unwrap().push(observer);
    }

    pub(crate) fn latest_recommendations(&self) -> Option<RecommendationSet> {
        self.latest.lock().unwrap().clone()
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        *self.wakeup.requested.lock().unwrap() = true;
        self.wakeup.condvar.notify_one();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn controller_loop(
    controller: Arc<Controller>,
    executor: Executor,
    memory: Arc<MemoryManager>,
    stats: Arc<Stats>,
    config: Arc<Config>,
    gate: Arc<LogGate>,
    sampler: Arc<MetricsSampler>,
    wakeup: Arc<Wakeup>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        {
            let mut requested = wakeup.requested.lock().unwrap();
            let interval = Duration::from_millis(controller.interval_ms.load(Ordering::Relaxed));
            let (guard, _timeout) = wakeup
                .condvar
                .wait_timeout_while(requested, interval, |r| !*r)
                .unwrap();
            requested = guard;
            *requested = false;
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        tick(&executor, &memory, &stats, &config, &gate, &sampler, &controller);
    }
}

#[allow(clippy::too_many_arguments)]
fn tick(
    executor: &Executor,
    memory: &MemoryManager,
    stats: &Stats,
    config: &Config,
    gate: &Arc<LogGate>,
    sampler: &MetricsSampler,
    controller: &Controller,
) {
    let sample = sampler.sample(stats, memory, executor);
    let scheduler_stats = stats.snapshot(memory.active_len() as u64);
    let (pool_initial, pool_max) = config.pool_bounds();

    let set = recommend(
        &sample,
        &scheduler_stats,
        stats.recent_submission_rate(),
        config.default_timeout_ms(),
        memory.cleanup_interval_ms(),
        pool_initial,
        pool_max,
        config.strategy(),
    );

    if set.worker_count.should_apply {
        if let Err(err) = executor.set_worker_count(set.worker_count.value) {
            engine_log!(gate, LogLevel::Warn, "controller worker-count apply rejected: {err}");
        }
    }
    if set.cleanup_interval_ms.should_apply {
        memory.set_cleanup_interval_ms(set.cleanup_interval_ms.value);
    }
    if set.pool_initial.should_apply || set.pool_max.should_apply {
        let new_initial = set.pool_initial.value;
        let new_max = set.pool_max.value.max(new_initial);
        memory.resize_job_pool(new_initial, new_max);
        config.set_pool_bounds(new_initial, new_max);
    }
    config.apply_tuning(
        if set.timeout_ms.should_apply {
            set.timeout_ms.value
        } else {
            config.default_timeout_ms()
        },
        if set.priority_bias.should_apply {
            set.priority_bias.value
        } else {
            config.priority_bias()
        },
        if set.batch_size.should_apply {
            set.batch_size.value
        } else {
            config.batch_size()
        },
    );

    engine_log!(
        gate,
        LogLevel::Info,
        "controller tick: pattern={:?} workers={} overall_confidence={:.2}",
        sample.pattern,
        scheduler_stats.workers,
        set.overall_confidence
    );

    for observer in controller.observers.lock().unwrap().iter() {
        observer(&set);
    }
    *controller.latest.lock().unwrap() = Some(set);
}
