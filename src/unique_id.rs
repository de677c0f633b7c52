use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide, monotonically increasing task identifier.
///
/// Ids are never reused within a process lifetime; a later submission always
/// receives a strictly greater id than an earlier one.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    pub fn new() -> TaskId {
        TaskId(next_id())
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        TaskId::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// Returns a process-wide unique, monotonically increasing u64.
fn next_id() -> NonZeroU64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let got = COUNTER.fetch_add(1, Ordering::Relaxed);
    NonZeroU64::new(got + 1).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let a = TaskId::new();
        let b = TaskId::new();
        let c = TaskId::new();
        assert!(a < b);
        assert!(b < c);
    }
}
