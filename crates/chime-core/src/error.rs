use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChimeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },
}

impl ChimeError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            ChimeError::Config(_) => "CONFIG_ERROR",
            ChimeError::JobNotFound { .. } => "JOB_NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChimeError>;
