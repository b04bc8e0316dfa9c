use thiserror::Error;

use crate::domain::JobType;

/// Persistence failure. The only error the queue's public operations surface.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("payload could not be encoded: {0}")]
    Payload(#[from] serde_json::Error),

    /// A row exists but cannot be mapped back into a `Job`.
    #[error("corrupt job row {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate handler for job_type={0}")]
    DuplicateHandler(JobType),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no handler registered for expected job types: {0:?}")]
    MissingJobTypes(Vec<JobType>),
}

/// Error returned by a job handler.
///
/// Handlers classify explicitly with `Retryable` / `Fatal`; anything converted
/// from `anyhow::Error` (so `?` on an `anyhow::Result`) counts as retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn retryable(msg: impl std::fmt::Display) -> Self {
        HandlerError::Retryable(msg.to_string())
    }

    pub fn fatal(msg: impl std::fmt::Display) -> Self {
        HandlerError::Fatal(msg.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::Retryable(format!("{err:#}"))
    }
}
