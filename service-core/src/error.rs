use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Job state error: {0}")]
    JobStateError(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Store error: {0}")]
    StoreError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Malformed input; classified immediately, never retried.
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::ValidationError(_))
    }

    /// Determines whether an error may be transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::UpstreamUnavailable(_)
                | AppError::StoreError(_)
                | AppError::InternalError(_)
        )
    }

    /// Determines whether an error is definitely not retryable.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            AppError::ValidationError(_)
                | AppError::JobStateError(_)
                | AppError::Conflict(_)
                | AppError::NotFound(_)
                | AppError::ConfigError(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}
