use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::unique_id::TaskId;

/// Lifecycle state of a task. Transitions are monotonic: Pending -> Running ->
/// {Completed | Failed | Cancelled}, or Pending -> Cancelled directly.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Discretisation of average task execution time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum TaskComplexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Heavy,
}

impl TaskComplexity {
    pub fn from_exec_ms(ms: f64) -> Self {
        if ms < 1.0 {
            TaskComplexity::Trivial
        } else if ms < 10.0 {
            TaskComplexity::Simple
        } else if ms < 100.0 {
            TaskComplexity::Moderate
        } else if ms < 1000.0 {
            TaskComplexity::Complex
        } else {
            TaskComplexity::Heavy
        }
    }

    /// Base timeout in milliseconds used as a starting point by the recommendation engine.
    pub fn base_timeout_ms(self) -> u64 {
        match self {
            TaskComplexity::Trivial => 1_000,
            TaskComplexity::Simple => 5_000,
            TaskComplexity::Moderate => 15_000,
            TaskComplexity::Complex => 60_000,
            TaskComplexity::Heavy => 300_000,
        }
    }
}

struct TaskState {
    status: TaskStatus,
    result: Vec<u8>,
    error: String,
    enqueued_at: Instant,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    deadline: Option<Instant>,
    priority: i8,
    timeout_ms: u64,
    timed_out: bool,
}

/// Per-submission state: id, status, result, error, and the four lifecycle
/// timestamps. A task record is created at submit and reaches exactly one
/// terminal state; its fields are written at most once each.
pub struct TaskRecord {
    id: TaskId,
    state: Mutex<TaskState>,
    cv: Condvar,
}

impl TaskRecord {
    pub(crate) fn new(id: TaskId, priority: i8, timeout_ms: u64) -> Self {
        let now = Instant::now();
        TaskRecord {
            id,
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                result: Vec::new(),
                error: String::new(),
                enqueued_at: now,
                started_at: None,
                completed_at: None,
                deadline: if timeout_ms > 0 {
                    Some(now + Duration::from_millis(timeout_ms))
                } else {
                    None
                },
                priority,
                timeout_ms,
                timed_out: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().unwrap().status
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Called exactly once by the worker that dequeues this task, unless it
    /// was cancelled while still pending.
    pub(crate) fn mark_started(&self) {
        let mut s = self.state.lock().unwrap();
        if s.status == TaskStatus::Pending {
            s.status = TaskStatus::Running;
            s.started_at = Some(Instant::now());
        }
    }

    /// Called by the worker once the closure returns or panics. A no-op if
    /// the task already reached a terminal state (e.g. the timeout reaper
    /// beat the worker to it).
    pub(crate) fn mark_completed(&self, outcome: Result<Vec<u8>, String>) {
        let mut s = self.state.lock().unwrap();
        if s.status.is_terminal() {
            return;
        }
        s.completed_at = Some(Instant::now());
        match outcome {
            Ok(result) => {
                s.result = result;
                s.status = TaskStatus::Completed;
            }
            Err(error) => {
                s.error = error;
                s.status = TaskStatus::Failed;
            }
        }
        drop(s);
        self.cv.notify_all();
    }

    /// Called by the timeout reaper once the deadline passes and the task
    /// has not yet completed. The closure keeps running; its eventual
    /// result is discarded because `mark_completed` becomes a no-op.
    pub(crate) fn mark_timed_out(&self) -> bool {
        let mut s = self.state.lock().unwrap();
        if s.status.is_terminal() {
            return false;
        }
        s.timed_out = true;
        s.error = "task exceeded its configured deadline".to_string();
        s.status = TaskStatus::Failed;
        s.completed_at = Some(Instant::now());
        drop(s);
        self.cv.notify_all();
        true
    }

    /// Cooperative cancel: only takes effect while still Pending.
    pub fn cancel(&self) -> bool {
        let mut s = self.state.lock().unwrap();
        if s.status == TaskStatus::Pending {
            s.status = TaskStatus::Cancelled;
            s.completed_at = Some(Instant::now());
            drop(s);
            self.cv.notify_all();
            true
        } else {
            false
        }
    }

    /// Blocks until the task reaches a terminal state. Returns immediately
    /// if already terminal.
    pub fn join(&self) {
        let mut s = self.state.lock().unwrap();
        while !s.status.is_terminal() {
            s = self.cv.wait(s).unwrap();
        }
    }

    pub fn get_result(&self) -> Vec<u8> {
        let s = self.state.lock().unwrap();
        if s.status.is_terminal() {
            s.result.clone()
        } else {
            Vec::new()
        }
    }

    pub fn has_error(&self) -> bool {
        matches!(self.state.lock().unwrap().status, TaskStatus::Failed)
    }

    pub fn get_error(&self) -> String {
        self.state.lock().unwrap().error.clone()
    }

    pub fn timed_out(&self) -> bool {
        self.state.lock().unwrap().timed_out
    }

    pub fn priority(&self) -> i8 {
        self.state.lock().unwrap().priority
    }

    pub fn timeout_ms(&self) -> u64 {
        self.state.lock().unwrap().timeout_ms
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.state.lock().unwrap().deadline
    }

    /// Execution duration in milliseconds, once both started and completed.
    pub fn exec_duration_ms(&self) -> Option<f64> {
        let s = self.state.lock().unwrap();
        match (s.started_at, s.completed_at) {
            (Some(st), Some(ct)) => Some(ct.saturating_duration_since(st).as_secs_f64() * 1000.0),
            _ => None,
        }
    }

    /// Time spent waiting in the queue before dispatch, in milliseconds.
    pub fn queue_wait_ms(&self) -> Option<f64> {
        let s = self.state.lock().unwrap();
        s.started_at
            .map(|st| st.saturating_duration_since(s.enqueued_at).as_secs_f64() * 1000.0)
    }

    pub fn complexity(&self) -> Option<TaskComplexity> {
        self.exec_duration_ms().map(TaskComplexity::from_exec_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_task_is_pending_and_unfinished() {
        let t = TaskRecord::new(TaskId::new(), 0, 0);
        assert_eq!(t.status(), TaskStatus::Pending);
        assert!(!t.is_finished());
        assert_eq!(t.get_result(), Vec::<u8>::new());
    }

    #[test]
    fn completed_task_reports_result() {
        let t = TaskRecord::new(TaskId::new(), 0, 0);
        t.mark_started();
        t.mark_completed(Ok(b"42".to_vec()));
        assert!(t.is_finished());
        assert!(!t.has_error());
        assert_eq!(t.get_result(), b"42".to_vec());
    }

    #[test]
    fn failed_task_reports_error_and_empty_result() {
        let t = TaskRecord::new(TaskId::new(), 0, 0);
        t.mark_started();
        t.mark_completed(Err("boom".to_string()));
        assert!(t.has_error());
        assert_eq!(t.get_error(), "boom");
        assert_eq!(t.get_result(), Vec::<u8>::new());
    }

    #[test]
    fn cancel_only_takes_effect_while_pending() {
        let t = TaskRecord::new(TaskId::new(), 0, 0);
        assert!(t.cancel());
        assert_eq!(t.status(), TaskStatus::Cancelled);

        let t2 = TaskRecord::new(TaskId::new(), 0, 0);
        t2.mark_started();
        assert!(!t2.cancel());
        assert_eq!(t2.status(), TaskStatus::Running);
    }

    #[test]
    fn mark_completed_is_a_noop_once_terminal() {
        let t = TaskRecord::new(TaskId::new(), 0, 0);
        t.mark_started();
        t.mark_completed(Ok(b"first".to_vec()));
        t.mark_completed(Ok(b"second".to_vec()));
        assert_eq!(t.get_result(), b"first".to_vec());
    }

    #[test]
    fn complexity_thresholds() {
        assert_eq!(TaskComplexity::from_exec_ms(0.5), TaskComplexity::Trivial);
        assert_eq!(TaskComplexity::from_exec_ms(5.0), TaskComplexity::Simple);
        assert_eq!(TaskComplexity::from_exec_ms(50.0), TaskComplexity::Moderate);
        assert_eq!(TaskComplexity::from_exec_ms(500.0), TaskComplexity::Complex);
        assert_eq!(TaskComplexity::from_exec_ms(5000.0), TaskComplexity::Heavy);
    }
}
