//! Worker error types.

use thiserror::Error;
use vstab_motion::MotionError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Frame source error: {0}")]
    SourceFailed(String),

    #[error("Stabilization cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Motion error: {0}")]
    Motion(MotionError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn source_failed(msg: impl Into<String>) -> Self {
        Self::SourceFailed(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
    }
}

impl From<MotionError> for WorkerError {
    fn from(err: MotionError) -> Self {
        match err {
            MotionError::Cancelled => WorkerError::Cancelled,
            other => WorkerError::Motion(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_cancel_maps_to_cancelled() {
        let err: WorkerError = MotionError::Cancelled.into();
        assert!(err.is_cancelled());

        let err: WorkerError = MotionError::NotInitialized("optimizer").into();
        assert!(matches!(err, WorkerError::Motion(_)));
    }
}
