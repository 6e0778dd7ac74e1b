use thiserror::Error;

/// Errors raised by the filter core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Step interval must be positive and finite, got {0}")]
    NonPositiveDt(f64),

    #[error("Invalid filter configuration: {0}")]
    InvalidConfig(String),

    #[error("Non-finite measurement input: {0}")]
    NonFiniteInput(String),

    #[error("Innovation covariance is singular (measurement noise must be positive-definite)")]
    SingularInnovation,
}

/// Result type for filter operations
pub type FilterResult<T> = Result<T, FilterError>;

/// Errors raised while loading or saving measurement sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session decoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session contains no steps")]
    Empty,
}
