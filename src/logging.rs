use std::sync::atomic::{AtomicU8, Ordering};

/// Severity levels the embedder can select with `set_log_level`. Levels map
/// linearly onto `log`'s; `Off` silences everything this engine emits
/// regardless of the embedder's own global log configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn rank(self) -> u8 {
        match self {
            LogLevel::Off => 0,
            LogLevel::Error => 1,
            LogLevel::Warn => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
            LogLevel::Trace => 5,
        }
    }

    fn from_rank(rank: u8) -> LogLevel {
        match rank {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// A per-engine filter, separate from `log`'s global max level, so an
/// embedding host can mute this engine without touching other libraries'
/// log output.
pub(crate) struct LogGate(AtomicU8);

impl LogGate {
    pub(crate) fn new(level: LogLevel) -> Self {
        LogGate(AtomicU8::new(level.rank()))
    }

    pub(crate) fn set(&self, level: LogLevel) {
        self.0.store(level.rank(), Ordering::Relaxed);
    }

    pub(crate) fn enabled(&self, level: LogLevel) -> bool {
        level.rank() <= self.0.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn level(&self) -> LogLevel {
        LogLevel::from_rank(self.0.load(Ordering::Relaxed))
    }
}

/// Emits through the `log` facade, gated by a [LogGate], at natural points:
/// submission/dispatch/completion at trace/debug, controller ticks and
/// applied recommendations at info, admission refusals and cleanup read
/// failures at warn, caught panics at error.
macro_rules! engine_log {
    ($gate:expr, $level:expr, $($arg:tt)+) => {
        if $gate.enabled($level) {
            match $level {
                $crate::logging::LogLevel::Error => log::error!($($arg)+),
                $crate::logging::LogLevel::Warn => log::warn!($($arg)+),
                $crate::logging::LogLevel::Info => log::info!($($arg)+),
                $crate::logging::LogLevel::Debug => log::debug!($($arg)+),
                $crate::logging::LogLevel::Trace => log::trace!($($arg)+),
                $crate::logging::LogLevel::Off => {}
            }
        }
    };
}

pub(crate) use engine_log;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_filters_by_rank() {
        let gate = LogGate::new(LogLevel::Warn);
        assert!(gate.enabled(LogLevel::Error));
        assert!(gate.enabled(LogLevel::Warn));
        assert!(!gate.enabled(LogLevel::Info));
        gate.set(LogLevel::Trace);
        assert!(gate.enabled(LogLevel::Trace));
        assert_eq!(gate.level(), LogLevel::Trace);
    }
}
