//! Error types for motion pipeline initialization.
//!
//! Per-frame estimation problems never surface here: they degrade to
//! identity motion inside the estimators. Only set-up failures and
//! cancelled batch work are reported to callers.

use thiserror::Error;
use vstab_models::AlgorithmKind;

/// Result type for motion pipeline operations.
pub type MotionResult<T> = Result<T, MotionError>;

/// Errors surfaced by the motion pipeline.
#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Capability '{capability}' required by {algorithm} is not available")]
    CapabilityMissing {
        capability: &'static str,
        algorithm: AlgorithmKind,
    },

    #[error("Invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Component not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MotionError {
    /// Create a missing capability error.
    pub fn capability_missing(capability: &'static str, algorithm: AlgorithmKind) -> Self {
        Self::CapabilityMissing {
            capability,
            algorithm,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error should stop the pipeline until re-initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MotionError::CapabilityMissing { .. } | MotionError::InvalidDimensions { .. }
        )
    }
}
