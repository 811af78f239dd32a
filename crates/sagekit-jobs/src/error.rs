use std::time::Duration;
use thiserror::Error;

pub type JobResult<T> = std::result::Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed or incomplete job request, detected before anything is sent.
    #[error("invalid job spec: {0}")]
    SpecValidation(String),

    /// The control plane refused the request (name conflict, quota, permissions).
    #[error("submission of {job} rejected: {message}")]
    SubmissionRejected { job: String, message: String },

    #[error("job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },

    #[error("job {job} was stopped before completing")]
    JobStopped { job: String },

    /// The waiter's deadline elapsed. The remote job keeps running.
    #[error("timed out after {waited:?} waiting for {job}")]
    Timeout { job: String, waited: Duration },

    #[error("job {job} is not in a terminal state (currently {status})")]
    NotTerminal { job: String, status: String },

    #[error("data inconsistency: {0}")]
    DataInconsistency(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("control plane error: {0}")]
    Remote(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    /// Whether the remote system itself reported the job as unsuccessful.
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, Self::JobFailed { .. } | Self::JobStopped { .. })
    }
}
