//! Shared data models for the vstab stabilization pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - 2D affine transforms and their decomposed parameters
//! - Per-frame motion samples
//! - Trajectory records and translation bounds
//! - Stabilization configuration and strategy selectors

pub mod config;
pub mod sample;
pub mod trajectory;
pub mod transform;

// Re-export common types
pub use config::{
    AlgorithmKind, BorderPolicy, ConfigParseError, ProcessingMode, SmootherKind,
    StabilizationConfig,
};
pub use sample::MotionSample;
pub use trajectory::{TrajectoryBounds, TrajectoryRecord};
pub use transform::{InvalidTransform, MotionLimits, MotionParams, Transform2D};
