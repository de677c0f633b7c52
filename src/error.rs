use crate::unique_id::TaskId;

/// Error kinds returned synchronously to the call that produced them:
/// admission, dispatch, lookup, and configuration failures. A task's own
/// Timeout/TaskFailure/Cancelled outcome is never propagated this way —
/// per the core's propagation policy, those stay isolated to the task
/// record and are only ever observed as a string through `get_error`.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("task {0} is unknown (never submitted or already reclaimed)")]
    NotFound(TaskId),

    #[error("admission refused: {reason}")]
    AdmissionRefused { reason: String },

    #[error("executor unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("invalid configuration: {reason}")]
    ConfigurationInvalid { reason: String },
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
