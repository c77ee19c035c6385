use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Stable, discriminated error kinds shared across every crate in the workspace.
///
/// Every lower layer (embedding provider, store adapter) converts its own raw
/// errors into one of these before the error crosses a component boundary, so
/// nothing above `common` ever matches on `surrealdb::Error` or a provider's
/// own error type directly.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient error: {0}")]
    Transient(String),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("partial result: {0}")]
    PartialResult(String),
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("embedding provider error: {0}")]
    Embedding(#[from] OpenAIError),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// The stable `kind` discriminator carried on every error response.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "InvalidInput",
            CoreError::NotFound(_) => "NotFound",
            CoreError::Conflict(_) => "Conflict",
            CoreError::Transient(_) => "Transient",
            CoreError::RateLimited { .. } => "RateLimited",
            CoreError::PartialResult(_) => "PartialResult",
            CoreError::FatalConfig(_) => "FatalConfig",
            CoreError::Internal(_) => "Internal",
            CoreError::Database(_) => "Internal",
            CoreError::Embedding(_) => "Transient",
            CoreError::Join(_) => "Internal",
            CoreError::Io(_) => "Internal",
        }
    }

    /// Whether the failure is locally recoverable by a caller who retries (§7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::Database(_) | CoreError::Embedding(_))
    }
}
