use thiserror::Error;

/// A malformed `every` or `at` specification. Raised only while building a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Failed to parse every: {0}")]
    Every(String),

    #[error("Failed to parse at: {0}")]
    At(String),
}

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job definition could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The job cannot be registered (e.g. duplicate identity).
    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
