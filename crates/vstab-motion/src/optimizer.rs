//! Trajectory optimization.
//!
//! Collects the cumulative transforms of a clip, smooths them with the
//! configured strategy, then corrects the translation in two passes:
//! - the drift between the smoothed and original extents is removed,
//!   ramping in over the first `ramp_fraction` of the clip;
//! - any frame still past an edge of the original extent is pulled back
//!   by `boundary_constraint` of its overshoot, so at 1.0 the optimized
//!   path never leaves the original extent.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;
use vstab_models::{
    ProcessingMode, SmootherKind, StabilizationConfig, TrajectoryBounds, TrajectoryRecord,
    Transform2D,
};

use crate::error::{MotionError, MotionResult};
use crate::metrics;
use crate::smoother::{create_smoother_with, AdaptiveTuning};

/// How often the cancellation flag is polled while smoothing.
const CANCEL_POLL_INTERVAL: usize = 64;

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Smoothing strategy (default: adaptive)
    pub smoother: SmootherKind,
    /// Smoothing window, frames per side (default: 30)
    pub window_size: usize,
    /// Smoothing strength in [0, 1] (default: 0.7)
    pub strength: f64,
    /// Pull back into the original bounds, in [0, 1] (default: 0.8)
    pub boundary_constraint: f64,
    /// Leading fraction of the clip over which the pull ramps in (default: 0.2)
    pub ramp_fraction: f64,
    /// Offline or realtime (default: offline)
    pub mode: ProcessingMode,
    /// Adaptive smoother thresholds
    pub adaptive: AdaptiveTuning,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::from_stabilization(&StabilizationConfig::default())
    }
}

impl OptimizerConfig {
    pub fn from_stabilization(config: &StabilizationConfig) -> Self {
        let config = config.clamped();
        Self {
            smoother: config.smoother,
            window_size: config.window_size,
            strength: config.strength,
            boundary_constraint: config.boundary_constraint,
            ramp_fraction: 0.2,
            mode: config.mode,
            adaptive: AdaptiveTuning::default(),
        }
    }

    /// Measure adaptive motion intensity relative to `width` × `height` frames.
    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.adaptive.frame_size = Some((width, height));
        self
    }

    /// Share of the boundary correction applied at `index` of `len` frames.
    pub fn constraint_factor(&self, index: usize, len: usize) -> f64 {
        if len == 0 {
            return 0.0;
        }
        let progress = index as f64 / len as f64;
        let ramp = if self.ramp_fraction > 0.0 {
            (progress / self.ramp_fraction).min(1.0)
        } else {
            1.0
        };
        ramp * self.boundary_constraint
    }
}

/// Smooths and bounds a whole trajectory.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryOptimizer {
    config: Option<OptimizerConfig>,
    record: TrajectoryRecord,
    timestamps: Vec<i64>,
}

impl TrajectoryOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OptimizerConfig) -> Self {
        let mut optimizer = Self::new();
        optimizer.configure(config);
        optimizer
    }

    /// Configure and clear any collected transforms.
    pub fn initialize(&mut self, smoother: SmootherKind, window_size: usize, strength: f64, boundary_constraint: f64) {
        let config = self.config.clone().unwrap_or_default();
        self.configure(OptimizerConfig {
            smoother,
            window_size,
            strength,
            boundary_constraint,
            ..config
        });
    }

    pub fn configure(&mut self, config: OptimizerConfig) {
        let clamped = StabilizationConfig {
            strength: config.strength,
            smoother: config.smoother,
            window_size: config.window_size,
            boundary_constraint: config.boundary_constraint,
            mode: config.mode,
            ..Default::default()
        }
        .clamped();

        self.config = Some(OptimizerConfig {
            smoother: clamped.smoother,
            window_size: clamped.window_size,
            strength: clamped.strength,
            boundary_constraint: clamped.boundary_constraint,
            ramp_fraction: config.ramp_fraction.clamp(0.0, 1.0),
            ..config
        });
        self.record.clear();
        self.timestamps.clear();
    }

    pub fn config(&self) -> Option<&OptimizerConfig> {
        self.config.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.config.is_some()
    }

    /// Append the next cumulative transform, stamped with its index.
    pub fn add_transform(&mut self, transform: Transform2D) {
        let timestamp = self.timestamps.len() as i64;
        self.add_transform_at(transform, timestamp);
    }

    pub fn add_transform_at(&mut self, transform: Transform2D, timestamp_ms: i64) {
        self.record.push_original(transform);
        self.timestamps.push(timestamp_ms);
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    /// Smooth and bound every collected transform.
    pub fn optimize_trajectory(&mut self) -> MotionResult<&[Transform2D]> {
        self.optimize_trajectory_with_cancel(|| false)
    }

    /// Like [`TrajectoryOptimizer::optimize_trajectory`], polling
    /// `is_cancelled` while smoothing. A cancelled run leaves the previous
    /// results untouched.
    pub fn optimize_trajectory_with_cancel<F>(&mut self, is_cancelled: F) -> MotionResult<&[Transform2D]>
    where
        F: Fn() -> bool,
    {
        let config = self
            .config
            .clone()
            .ok_or(MotionError::NotInitialized("trajectory optimizer"))?;
        let originals = self.record.originals();
        let n = originals.len();
        if n == 0 {
            return Ok(&[]);
        }
        let start = Instant::now();

        let mut smoother = create_smoother_with(
            config.smoother,
            config.window_size,
            config.strength,
            config.mode,
            config.adaptive.clone(),
        );
        for (i, (transform, timestamp)) in originals.iter().zip(&self.timestamps).enumerate() {
            if i % CANCEL_POLL_INTERVAL == 0 && is_cancelled() {
                return Err(MotionError::Cancelled);
            }
            smoother.add_transform(*transform, *timestamp);
        }
        let smoothed = smoother.smooth_transforms().to_vec();

        let (Some(original_bounds), Some(smooth_bounds)) = (
            TrajectoryBounds::from_transforms(originals),
            TrajectoryBounds::from_transforms(&smoothed),
        ) else {
            return Err(MotionError::internal("empty trajectory bounds"));
        };
        let [dx_min, dy_min, dx_max, dy_max] = smooth_bounds.diff(&original_bounds);
        let drift_x = (dx_min + dx_max) / 2.0;
        let drift_y = (dy_min + dy_max) / 2.0;

        let optimized: Vec<Transform2D> = smoothed
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let factor = config.constraint_factor(i, n);
                let (tx, ty) = t.translation();
                let (tx, ty) = original_bounds.pull_inside(
                    tx - drift_x * factor,
                    ty - drift_y * factor,
                    config.boundary_constraint,
                );
                t.with_translation(tx, ty)
            })
            .collect();

        if is_cancelled() {
            return Err(MotionError::Cancelled);
        }
        if !self.record.commit(smoothed, optimized) {
            return Err(MotionError::internal("smoothed trajectory length mismatch"));
        }

        let elapsed = start.elapsed();
        metrics::record_optimization(n, elapsed.as_secs_f64());
        info!(
            frames = n,
            smoother = %config.smoother,
            drift_x,
            drift_y,
            "Trajectory optimization took {:?}",
            elapsed
        );
        Ok(self.record.optimized_all())
    }

    pub fn is_optimized(&self) -> bool {
        self.record.is_optimized()
    }

    pub fn original_transform(&self, index: usize) -> Transform2D {
        self.record.original(index)
    }

    pub fn smooth_transform(&self, index: usize) -> Transform2D {
        self.record.smoothed(index)
    }

    pub fn optimized_transform(&self, index: usize) -> Transform2D {
        self.record.optimized(index)
    }

    /// Warp that takes frame `index` from its original pose to its
    /// optimized pose: `optimized · original⁻¹`.
    pub fn corrective_transform(&self, index: usize) -> Transform2D {
        if index >= self.record.len() || !self.record.is_optimized() {
            return Transform2D::identity();
        }
        let original_inverse = self.record.original(index).inverse();
        Transform2D::from_matrix(self.record.optimized(index).matrix() * original_inverse.matrix())
            .unwrap_or_default()
    }

    /// Smoothed bounds minus original bounds as `[min_x, min_y, max_x, max_y]`.
    pub fn boundary_diff(&self) -> Option<[f64; 4]> {
        let original = self.record.original_bounds()?;
        let smooth = self.record.smooth_bounds()?;
        Some(smooth.diff(&original))
    }

    pub fn record(&self) -> &TrajectoryRecord {
        &self.record
    }

    /// Drop collected transforms and results, keeping the configuration.
    pub fn reset(&mut self) {
        self.record.clear();
        self.timestamps.clear();
    }

    /// Drop everything, including the configuration.
    pub fn release(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn shaky_path(n: usize) -> Vec<Transform2D> {
        (0..n)
            .map(|i| {
                let jitter = if i % 2 == 0 { 4.0 } else { -4.0 };
                Transform2D::from_translation(i as f64 * 0.5 + jitter, (i as f64 * 0.2).sin() * 6.0 - jitter)
            })
            .collect()
    }

    fn optimizer(smoother: SmootherKind, boundary: f64) -> TrajectoryOptimizer {
        let mut optimizer = TrajectoryOptimizer::new();
        optimizer.initialize(smoother, 8, 0.8, boundary);
        optimizer
    }

    #[test]
    fn test_requires_initialize() {
        let mut optimizer = TrajectoryOptimizer::new();
        optimizer.add_transform(Transform2D::identity());
        assert!(matches!(
            optimizer.optimize_trajectory(),
            Err(MotionError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_empty_trajectory_is_ok() {
        let mut optimizer = optimizer(SmootherKind::Gaussian, 0.8);
        assert!(optimizer.optimize_trajectory().unwrap().is_empty());
        assert!(!optimizer.is_optimized());
    }

    #[test]
    fn test_optimized_stays_within_original_bounds() {
        let mut optimizer = optimizer(SmootherKind::Gaussian, 1.0);
        for t in shaky_path(120) {
            optimizer.add_transform(t);
        }
        optimizer.optimize_trajectory().unwrap();

        let original = optimizer.record().original_bounds().unwrap();
        let optimized = TrajectoryBounds::from_transforms(optimizer.record().optimized_all()).unwrap();
        assert!(original.contains(&optimized, 1e-9), "{original:?} {optimized:?}");
    }

    #[test]
    fn test_causal_smoothers_stay_within_original_bounds() {
        let constant = vec![Transform2D::from_translation(10.0, -3.0); 60];
        let step: Vec<_> = (0..60)
            .map(|i| Transform2D::from_translation(if i < 5 { 0.0 } else { 10.0 }, 0.0))
            .collect();

        for kind in [SmootherKind::Kalman, SmootherKind::Adaptive] {
            for path in [constant.clone(), step.clone(), shaky_path(120)] {
                let mut optimizer = optimizer(kind, 1.0);
                for t in &path {
                    optimizer.add_transform(*t);
                }
                optimizer.optimize_trajectory().unwrap();

                let original = optimizer.record().original_bounds().unwrap();
                let optimized = TrajectoryBounds::from_transforms(optimizer.record().optimized_all()).unwrap();
                assert!(original.contains(&optimized, 1e-9), "{kind}: {original:?} {optimized:?}");
            }
        }
    }

    #[test]
    fn test_constant_path_is_unchanged() {
        let t = Transform2D::from_translation(10.0, -3.0);
        for kind in SmootherKind::ALL {
            let mut optimizer = optimizer(*kind, 1.0);
            for _ in 0..30 {
                optimizer.add_transform(t);
            }
            for optimized in optimizer.optimize_trajectory().unwrap() {
                assert!(optimized.approx_eq(&t, 1e-9), "{kind}: {optimized:?}");
            }
        }
    }

    #[test]
    fn test_zero_boundary_constraint_keeps_smoothed_path() {
        let mut optimizer = optimizer(SmootherKind::Kalman, 0.0);
        for t in shaky_path(50) {
            optimizer.add_transform(t);
        }
        optimizer.optimize_trajectory().unwrap();
        for i in 0..50 {
            assert!(optimizer.optimized_transform(i).approx_eq(&optimizer.smooth_transform(i), 1e-12));
        }
    }

    #[test]
    fn test_constraint_ramps_in() {
        let config = OptimizerConfig {
            boundary_constraint: 0.5,
            ..Default::default()
        };
        assert_eq!(config.constraint_factor(0, 100), 0.0);
        assert!((config.constraint_factor(10, 100) - 0.25).abs() < 1e-12);
        assert_eq!(config.constraint_factor(20, 100), 0.5);
        assert_eq!(config.constraint_factor(90, 100), 0.5);
    }

    #[test]
    fn test_frame_size_reaches_adaptive_tuning() {
        let config = OptimizerConfig::default().with_frame_size(1920, 1080);
        assert_eq!(config.adaptive.frame_size, Some((1920, 1080)));
        assert_eq!(config.adaptive.translation_scale(), (1920.0, 1080.0));
    }

    #[test]
    fn test_corrective_transform_maps_original_to_optimized() {
        let mut optimizer = optimizer(SmootherKind::Adaptive, 0.8);
        for t in shaky_path(40) {
            optimizer.add_transform(t);
        }
        assert!(optimizer.corrective_transform(3).is_identity(0.0));
        optimizer.optimize_trajectory().unwrap();

        for i in [0, 7, 39] {
            let correction = optimizer.corrective_transform(i);
            let applied = Transform2D::from_matrix(correction.matrix() * optimizer.original_transform(i).matrix()).unwrap();
            assert!(applied.approx_eq(&optimizer.optimized_transform(i), 1e-9));
        }
        assert!(optimizer.corrective_transform(40).is_identity(0.0));
    }

    #[test]
    fn test_cancel_keeps_previous_results() {
        let mut optimizer = optimizer(SmootherKind::Gaussian, 0.8);
        for t in shaky_path(200) {
            optimizer.add_transform(t);
        }
        optimizer.optimize_trajectory().unwrap();
        let before = optimizer.record().optimized_all().to_vec();

        let polls = Cell::new(0);
        let result = optimizer.optimize_trajectory_with_cancel(|| {
            polls.set(polls.get() + 1);
            polls.get() > 1
        });
        assert!(matches!(result, Err(MotionError::Cancelled)));
        assert_eq!(polls.get(), 2);
        assert!(optimizer.is_optimized());
        assert_eq!(optimizer.record().optimized_all(), before.as_slice());
    }

    #[test]
    fn test_out_of_range_queries_are_identity() {
        let optimizer = optimizer(SmootherKind::Gaussian, 0.8);
        assert!(optimizer.original_transform(0).is_identity(0.0));
        assert!(optimizer.smooth_transform(10).is_identity(0.0));
        assert!(optimizer.optimized_transform(10).is_identity(0.0));
        assert!(optimizer.boundary_diff().is_none());
    }

    #[test]
    fn test_configuration_is_clamped() {
        let mut optimizer = TrajectoryOptimizer::new();
        optimizer.initialize(SmootherKind::Gaussian, 0, 3.0, -1.0);
        let config = optimizer.config().unwrap();
        assert_eq!(config.window_size, 1);
        assert_eq!(config.strength, 1.0);
        assert_eq!(config.boundary_constraint, 0.0);
    }
}
