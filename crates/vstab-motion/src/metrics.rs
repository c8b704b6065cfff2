//! Metrics emitted by the motion pipeline.
//!
//! Uses the `metrics` facade; nothing is recorded unless the embedding
//! binary installs a recorder.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_ESTIMATED_TOTAL: &str = "vstab_frames_estimated_total";
    pub const ESTIMATES_DEGRADED_TOTAL: &str = "vstab_estimates_degraded_total";
    pub const REACQUISITIONS_TOTAL: &str = "vstab_reference_reacquisitions_total";
    pub const INLIER_RATIO: &str = "vstab_inlier_ratio";
    pub const SMOOTHER_SWITCHES_TOTAL: &str = "vstab_smoother_switches_total";
    pub const MOTION_INTENSITY: &str = "vstab_motion_intensity";
    pub const OPTIMIZE_DURATION_SECONDS: &str = "vstab_optimize_duration_seconds";
    pub const OPTIMIZED_FRAMES_TOTAL: &str = "vstab_optimized_frames_total";
    pub const FRAME_DURATION_SECONDS: &str = "vstab_frame_duration_seconds";
    pub const DEADLINE_MISSES_TOTAL: &str = "vstab_deadline_misses_total";
}

/// Why an estimate fell back to identity motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeReason {
    InsufficientFeatures,
    InsufficientMatches,
    LowInlierRatio,
    HomographyFailed,
    InvalidTransform,
    NoSensorData,
    NotInitialized,
}

impl DegradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradeReason::InsufficientFeatures => "insufficient_features",
            DegradeReason::InsufficientMatches => "insufficient_matches",
            DegradeReason::LowInlierRatio => "low_inlier_ratio",
            DegradeReason::HomographyFailed => "homography_failed",
            DegradeReason::InvalidTransform => "invalid_transform",
            DegradeReason::NoSensorData => "no_sensor_data",
            DegradeReason::NotInitialized => "not_initialized",
        }
    }
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record one estimator call.
pub fn record_frame_estimated(algorithm: &'static str) {
    counter!(names::FRAMES_ESTIMATED_TOTAL, "algorithm" => algorithm).increment(1);
}

/// Record an estimate that degraded to identity.
pub fn record_degraded(algorithm: &'static str, reason: DegradeReason) {
    counter!(
        names::ESTIMATES_DEGRADED_TOTAL,
        "algorithm" => algorithm,
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a reference re-detection.
pub fn record_reacquisition(algorithm: &'static str) {
    counter!(names::REACQUISITIONS_TOTAL, "algorithm" => algorithm).increment(1);
}

pub fn record_inlier_ratio(ratio: f64) {
    histogram!(names::INLIER_RATIO).record(ratio);
}

/// Record the adaptive smoother changing its active strategy.
pub fn record_smoother_switch(to: &'static str) {
    counter!(names::SMOOTHER_SWITCHES_TOTAL, "to" => to).increment(1);
}

pub fn record_motion_intensity(intensity: f64) {
    gauge!(names::MOTION_INTENSITY).set(intensity);
}

/// Record one completed trajectory optimization.
pub fn record_optimization(frames: usize, duration_secs: f64) {
    histogram!(names::OPTIMIZE_DURATION_SECONDS).record(duration_secs);
    counter!(names::OPTIMIZED_FRAMES_TOTAL).increment(frames as u64);
}

/// Record one realtime frame and whether it overran its deadline.
pub fn record_frame_duration(duration_secs: f64, missed_deadline: bool) {
    histogram!(names::FRAME_DURATION_SECONDS).record(duration_secs);
    if missed_deadline {
        counter!(names::DEADLINE_MISSES_TOTAL).increment(1);
    }
}
