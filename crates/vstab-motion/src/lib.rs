//! Motion estimation, trajectory smoothing and trajectory optimization.
//!
//! This crate provides:
//! - Pluggable correspondence capabilities ([`vision`]) and a shared
//!   [`VisionContext`] holding them
//! - Frame-pair motion estimators (feature, optical flow, sensor, hybrid)
//! - Gaussian, Kalman and adaptive trajectory smoothers
//! - A [`TrajectoryOptimizer`] that smooths a whole clip and keeps the
//!   result inside the original translation extent

pub mod context;
pub mod error;
pub mod estimator;
pub mod metrics;
pub mod optimizer;
pub mod smoother;
pub mod vision;

pub use context::{VisionContext, VisionContextBuilder};
pub use error::{MotionError, MotionResult};
pub use estimator::{
    create_estimator, EstimatorTuning, ImuSample, MotionEstimator, TrackingState,
};
pub use optimizer::{OptimizerConfig, TrajectoryOptimizer};
pub use smoother::{create_smoother, AdaptiveTuning, MotionSmoother};
pub use vision::VideoFrame;
