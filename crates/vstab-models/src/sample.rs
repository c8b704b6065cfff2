//! Per-frame motion samples.

use serde::{Deserialize, Serialize};

use crate::transform::Transform2D;

/// One estimated transform tagged with its frame position.
///
/// Produced once per frame by an estimator. Downstream stages take their
/// own copy; samples are never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    /// Cumulative transform of this frame relative to the first frame
    pub transform: Transform2D,
    /// Zero-based frame index
    pub frame_index: u64,
    /// Presentation timestamp in milliseconds
    pub timestamp_ms: i64,
}

impl MotionSample {
    pub fn new(transform: Transform2D, frame_index: u64, timestamp_ms: i64) -> Self {
        Self {
            transform,
            frame_index,
            timestamp_ms,
        }
    }

    /// Sample for the first frame of a sequence.
    pub fn first(timestamp_ms: i64) -> Self {
        Self::new(Transform2D::identity(), 0, timestamp_ms)
    }
}
