//! Job engine error model.

use std::time::Duration;

use thiserror::Error;

use photohub_core::JobId;
use photohub_workflow::WorkflowError;

use crate::store::JobStoreError;
use crate::types::{JobKind, JobState};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid parameters for {kind} job: {reason}")]
    InvalidParams { kind: JobKind, reason: String },

    /// The operation is not valid for the job's kind or current state.
    #[error("cannot {operation} job {job_id} in state {state}: {detail}")]
    InvalidState {
        job_id: JobId,
        operation: &'static str,
        state: JobState,
        detail: String,
    },

    #[error(
        "job {job_id} has already been retried {retry_count} times (max {max_retries})"
    )]
    RetryLimitExceeded {
        job_id: JobId,
        retry_count: u32,
        max_retries: u32,
    },

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The project status change a job depends on was rejected.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("job {job_id} still {state} after {timeout:?}")]
    WaitTimedOut {
        job_id: JobId,
        state: JobState,
        timeout: Duration,
    },

    #[error("job engine is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error("failed to spawn worker for job {job_id}: {source}")]
    Spawn {
        job_id: JobId,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    pub(crate) fn invalid_state(
        job_id: JobId,
        operation: &'static str,
        state: JobState,
        detail: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            job_id,
            operation,
            state,
            detail: detail.into(),
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, Self::Workflow(e) if e.is_illegal_transition())
    }
}

/// Failure of a single unit. Recorded on the job; only fatal once the
/// failure tolerance is exceeded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct UnitError(pub String);

impl UnitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<std::io::Error> for UnitError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<String> for UnitError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for UnitError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}
