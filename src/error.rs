use std::time::Duration;

/// Error taxonomy shared across the orchestrator, gates, and external-call
/// coordinator.
///
/// Categories:
/// - Transport: transient, worth retrying with backoff.
/// - Auth: credential missing or rejected, never retried.
/// - SchemaInvalid / NotFound: counted by callers, not raised as failures.
/// - BudgetExceeded: a phase or agent ran past its wall-clock budget.
/// - Duplicate: a literature request fingerprint is already in flight.
/// - GateBlock: a gate with `on_failure=block` failed; fatal for the run.
/// - UnexpectedChildExit: a phase child crashed or was killed.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid record at {path}: {reason}")]
    SchemaInvalid { path: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("budget exceeded after {0:?}")]
    BudgetExceeded(Duration),

    #[error("duplicate request blocked: {0}")]
    Duplicate(String),

    #[error("gate '{gate}' blocked the run: {reasons}")]
    GateBlock { gate: String, reasons: String },

    #[error("phase '{phase}' child exited unexpectedly: {detail}")]
    UnexpectedChildExit { phase: String, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl RunnerError {
    /// Returns true if the error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RunnerError::Transport(_))
    }

    /// Returns true if the error is unrecoverable and the orchestrator should halt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::Auth(_) | RunnerError::GateBlock { .. } | RunnerError::Config(_)
        )
    }
}

/// Bridge: allows `?` to convert `RunnerError` to `String` in code that still
/// uses `Result<T, String>` (gates, schema validation helpers).
impl From<RunnerError> for String {
    fn from(err: RunnerError) -> String {
        err.to_string()
    }
}
