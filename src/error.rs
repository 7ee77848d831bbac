use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeanflowError {
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Worker already registered: {0}")]
    DuplicateWorker(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Invalid measurement from worker {hostname}: execution time {execution_time}")]
    InvalidMeasurement { hostname: String, execution_time: f64 },

    #[error("Invariant violated for job {job_id}: {reason}")]
    InvariantViolation { job_id: String, reason: String },

    #[error("Invalid job {job_id}: {reason}")]
    InvalidJob { job_id: String, reason: String },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("Failed to deliver completion notification for job {job_id}: {reason}")]
    NotificationDelivery { job_id: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed input file {path}: {reason}")]
    MalformedInput { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl MeanflowError {
    pub fn invariant(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        MeanflowError::InvariantViolation {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Errors that mean the scheduler's own bookkeeping is corrupt. The
    /// scheduler loop stops instead of acknowledging the event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MeanflowError::InvariantViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, MeanflowError>;
