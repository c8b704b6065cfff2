//! Inter-frame motion estimation.
//!
//! Every estimator turns a pair of consecutive frames into the cumulative
//! transform of the current frame relative to the first one. A frame that
//! cannot be estimated contributes identity motion: the previous
//! cumulative transform is returned unchanged and the degrade is recorded
//! in metrics, so a trajectory never jumps or breaks.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──initialize──▶ Ready ──estimate──▶ Tracking
//!                                 ▲                   │ too few points
//!                                 │                   ▼
//!                                 └──── reset ─── Reacquiring
//! ```

pub mod feature;
pub mod hybrid;
pub mod optical_flow;
pub mod sensor;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vstab_models::{AlgorithmKind, MotionLimits, Transform2D};

use crate::context::VisionContext;
use crate::error::{MotionError, MotionResult};
use crate::metrics::{self, DegradeReason};
use crate::vision::{HomographySolver, VideoFrame};

pub use feature::FeatureMotionEstimator;
pub use hybrid::HybridMotionEstimator;
pub use optical_flow::OpticalFlowMotionEstimator;
pub use sensor::{ImuSample, SensorMotionEstimator};

/// Estimator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// `initialize` has not succeeded yet
    #[default]
    Uninitialized,
    /// Initialized, no reference points yet
    Ready,
    /// Last frame produced a validated estimate
    Tracking,
    /// Last frame degraded; the reference is being rebuilt
    Reacquiring,
}

impl TrackingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::Uninitialized => "uninitialized",
            TrackingState::Ready => "ready",
            TrackingState::Tracking => "tracking",
            TrackingState::Reacquiring => "reacquiring",
        }
    }
}

/// Empirical estimation thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorTuning {
    /// Minimum reference points or matches for an estimate (default: 10)
    pub min_points: usize,
    /// Detector budget per frame (default: 500)
    pub max_features: usize,
    /// Matches farther than `factor * min_distance` are dropped (default: 3.0)
    pub match_distance_factor: f64,
    /// Minimum RANSAC inlier ratio (default: 0.5)
    pub min_inlier_ratio: f64,
    /// RANSAC reprojection threshold in pixels (default: 3.0)
    pub reprojection_threshold: f64,
    /// Per-frame translation bound as a fraction of frame size (default: 0.2)
    pub max_translation_fraction: f64,
    /// Per-frame scale bound around 1.0 (default: 0.2)
    pub max_scale_delta: f64,
    /// Per-frame rotation bound in degrees (default: 30.0)
    pub max_rotation_deg: f64,
    /// Vision share of the hybrid blend (default: 0.7)
    pub hybrid_vision_weight: f64,
    /// Focal length as a multiple of frame width, for gyro translation (default: 1.0)
    pub focal_length_factor: f64,
}

impl Default for EstimatorTuning {
    fn default() -> Self {
        Self {
            min_points: 10,
            max_features: 500,
            match_distance_factor: 3.0,
            min_inlier_ratio: 0.5,
            reprojection_threshold: 3.0,
            max_translation_fraction: 0.2,
            max_scale_delta: 0.2,
            max_rotation_deg: 30.0,
            hybrid_vision_weight: 0.7,
            focal_length_factor: 1.0,
        }
    }
}

impl EstimatorTuning {
    pub fn limits_for(&self, width: u32, height: u32) -> MotionLimits {
        MotionLimits::for_frame(
            width,
            height,
            self.max_translation_fraction,
            self.max_scale_delta,
            self.max_rotation_deg,
        )
    }
}

/// Frame-pair motion estimator.
pub trait MotionEstimator: Send {
    fn kind(&self) -> AlgorithmKind;

    /// Prepare for frames of the given size. Must succeed before estimating.
    fn initialize(&mut self, width: u32, height: u32) -> MotionResult<()>;

    /// Cumulative transform of `curr` relative to the first frame.
    ///
    /// Never fails: a frame that cannot be estimated contributes identity
    /// motion.
    fn estimate_motion(&mut self, prev: &VideoFrame, curr: &VideoFrame) -> Transform2D;

    /// Forget the reference points and the accumulated transform.
    fn reset(&mut self);

    /// Drop all state, including initialization.
    fn release(&mut self);

    fn state(&self) -> TrackingState;

    /// Last cumulative transform returned.
    fn previous_transform(&self) -> Transform2D;

    /// Feed an IMU sample. Vision-only estimators ignore it.
    fn push_sensor_sample(&mut self, _sample: ImuSample) {}
}

/// Output of [`EstimatorCore::fit`].
#[derive(Debug, Clone)]
pub struct Estimate {
    /// Updated cumulative transform
    pub transform: Transform2D,
    /// Validated, constrained inter-frame transform
    pub delta: Transform2D,
    /// RANSAC inlier flags, index-aligned with the correspondences
    pub inliers: Vec<bool>,
}

/// Bookkeeping shared by all estimator strategies.
#[derive(Debug, Clone)]
pub struct EstimatorCore {
    algorithm: AlgorithmKind,
    tuning: EstimatorTuning,
    limits: Option<MotionLimits>,
    frame_size: (u32, u32),
    previous: Transform2D,
    state: TrackingState,
}

impl EstimatorCore {
    pub fn new(algorithm: AlgorithmKind, tuning: EstimatorTuning) -> Self {
        Self {
            algorithm,
            tuning,
            limits: None,
            frame_size: (0, 0),
            previous: Transform2D::identity(),
            state: TrackingState::Uninitialized,
        }
    }

    pub fn initialize(&mut self, width: u32, height: u32) -> MotionResult<()> {
        if width == 0 || height == 0 {
            return Err(MotionError::InvalidDimensions { width, height });
        }
        self.limits = Some(self.tuning.limits_for(width, height));
        self.frame_size = (width, height);
        self.previous = Transform2D::identity();
        self.state = TrackingState::Ready;
        debug!(
            algorithm = %self.algorithm,
            width,
            height,
            "Motion estimator initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.limits.is_some()
    }

    pub fn tuning(&self) -> &EstimatorTuning {
        &self.tuning
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn set_state(&mut self, state: TrackingState) {
        self.state = state;
    }

    pub fn previous(&self) -> Transform2D {
        self.previous
    }

    /// Count one estimator call. Returns false while uninitialized.
    pub fn begin_frame(&mut self) -> bool {
        if !self.is_initialized() {
            metrics::record_degraded(self.algorithm.as_str(), DegradeReason::NotInitialized);
            return false;
        }
        metrics::record_frame_estimated(self.algorithm.as_str());
        true
    }

    /// Record a degraded frame and return the unchanged cumulative transform.
    pub fn degrade(&mut self, reason: DegradeReason) -> Transform2D {
        debug!(algorithm = %self.algorithm, %reason, "Estimate degraded to identity motion");
        metrics::record_degraded(self.algorithm.as_str(), reason);
        if self.is_initialized() {
            self.state = TrackingState::Reacquiring;
        }
        self.previous
    }

    pub fn record_reacquisition(&self) {
        debug!(algorithm = %self.algorithm, "Reacquiring reference points");
        metrics::record_reacquisition(self.algorithm.as_str());
    }

    /// Validate, constrain and accumulate an inter-frame matrix.
    pub fn accept(&mut self, delta: &Transform2D) -> Transform2D {
        let limits = self
            .limits
            .unwrap_or_else(|| self.tuning.limits_for(self.frame_size.0, self.frame_size.1));
        let constrained = delta.constrain(&limits);
        self.previous = self.previous.accumulate(&constrained);
        self.state = TrackingState::Tracking;
        self.previous
    }

    /// Fit a homography to correspondences and fold it into the trajectory.
    ///
    /// The projective part is dropped: only the affine 2x3 block survives
    /// validation and constraining.
    pub fn fit(
        &mut self,
        solver: &dyn HomographySolver,
        src: &[Point2<f64>],
        dst: &[Point2<f64>],
    ) -> Result<Estimate, DegradeReason> {
        if src.len() < self.tuning.min_points || src.len() != dst.len() {
            return Err(DegradeReason::InsufficientMatches);
        }

        let fit = solver
            .find_homography(src, dst, self.tuning.reprojection_threshold)
            .ok_or(DegradeReason::HomographyFailed)?;
        let ratio = fit.inlier_ratio();
        metrics::record_inlier_ratio(ratio);
        if ratio < self.tuning.min_inlier_ratio {
            return Err(DegradeReason::LowInlierRatio);
        }

        let mut matrix = fit.matrix;
        let w = matrix[(2, 2)];
        if w.abs() > vstab_models::transform::SINGULAR_EPSILON {
            matrix /= w;
        }
        if !vstab_models::transform::is_valid(&matrix) {
            return Err(DegradeReason::InvalidTransform);
        }
        matrix[(2, 0)] = 0.0;
        matrix[(2, 1)] = 0.0;
        matrix[(2, 2)] = 1.0;
        let delta = Transform2D::from_matrix(matrix).ok_or(DegradeReason::InvalidTransform)?;

        let before = self.previous;
        let transform = self.accept(&delta);
        Ok(Estimate {
            transform,
            delta: before.inverse().accumulate(&transform),
            inliers: fit.inliers,
        })
    }

    pub fn reset(&mut self) {
        self.previous = Transform2D::identity();
        if self.is_initialized() {
            self.state = TrackingState::Ready;
        }
    }

    pub fn release(&mut self) {
        self.limits = None;
        self.frame_size = (0, 0);
        self.previous = Transform2D::identity();
        self.state = TrackingState::Uninitialized;
    }
}

/// Build the estimator for `kind` from the shared context.
///
/// Fails when the context lacks a capability the strategy needs.
pub fn create_estimator(
    kind: AlgorithmKind,
    context: &VisionContext,
    tuning: EstimatorTuning,
) -> MotionResult<Box<dyn MotionEstimator>> {
    context.require(kind)?;
    context.ensure_initialized();

    Ok(match kind {
        AlgorithmKind::Feature => Box::new(FeatureMotionEstimator::new(context, tuning)?),
        AlgorithmKind::OpticalFlow => Box::new(OpticalFlowMotionEstimator::new(context, tuning)?),
        AlgorithmKind::Sensor => Box::new(SensorMotionEstimator::new(tuning)),
        AlgorithmKind::Hybrid => Box::new(HybridMotionEstimator::new(context, tuning)?),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::vision::HomographyFit;
    use nalgebra::Matrix3;

    /// Solver returning a fixed matrix with every point an inlier.
    pub(crate) struct FixedSolver(pub Matrix3<f64>);

    impl HomographySolver for FixedSolver {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn find_homography(&self, src: &[Point2<f64>], _: &[Point2<f64>], _: f64) -> Option<HomographyFit> {
            Some(HomographyFit {
                matrix: self.0,
                inliers: vec![true; src.len()],
            })
        }
    }

    fn points(n: usize) -> Vec<Point2<f64>> {
        (0..n).map(|i| Point2::new(i as f64 * 3.0, (i * i) as f64 % 17.0)).collect()
    }

    #[test]
    fn test_core_requires_initialize() {
        let mut core = EstimatorCore::new(AlgorithmKind::Feature, EstimatorTuning::default());
        assert!(!core.begin_frame());
        assert!(core.initialize(0, 10).is_err());
        core.initialize(640, 480).unwrap();
        assert!(core.begin_frame());
        assert_eq!(core.state(), TrackingState::Ready);
    }

    #[test]
    fn test_fit_drops_projective_part_and_accumulates() {
        let mut core = EstimatorCore::new(AlgorithmKind::Feature, EstimatorTuning::default());
        core.initialize(640, 480).unwrap();
        let solver = FixedSolver(Matrix3::new(
            1.0, 0.0, 4.0, //
            0.0, 1.0, -2.0, //
            1e-4, 0.0, 1.0,
        ));

        let est = core.fit(&solver, &points(20), &points(20)).unwrap();
        assert!(est.delta.approx_eq(&Transform2D::from_translation(4.0, -2.0), 1e-9));
        let est = core.fit(&solver, &points(20), &points(20)).unwrap();
        assert_eq!(est.transform.translation(), (8.0, -4.0));
        assert_eq!(core.state(), TrackingState::Tracking);
    }

    #[test]
    fn test_fit_clamps_to_frame_limits() {
        let mut core = EstimatorCore::new(AlgorithmKind::Feature, EstimatorTuning::default());
        core.initialize(100, 50).unwrap();
        let solver = FixedSolver(Matrix3::new(
            1.0, 0.0, 500.0, //
            0.0, 1.0, -500.0, //
            0.0, 0.0, 1.0,
        ));

        let est = core.fit(&solver, &points(12), &points(12)).unwrap();
        let (tx, ty) = est.transform.translation();
        assert!((tx - 20.0).abs() < 1e-9);
        assert!((ty + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_rejects_degenerate_inputs() {
        let mut core = EstimatorCore::new(AlgorithmKind::Feature, EstimatorTuning::default());
        core.initialize(640, 480).unwrap();

        let singular = FixedSolver(Matrix3::zeros());
        assert_eq!(
            core.fit(&singular, &points(20), &points(20)).unwrap_err(),
            DegradeReason::InvalidTransform
        );
        assert_eq!(
            core.fit(&singular, &points(5), &points(5)).unwrap_err(),
            DegradeReason::InsufficientMatches
        );
        assert!(core.previous().is_identity(0.0));
    }

    #[test]
    fn test_degrade_keeps_cumulative() {
        let mut core = EstimatorCore::new(AlgorithmKind::OpticalFlow, EstimatorTuning::default());
        core.initialize(640, 480).unwrap();
        core.accept(&Transform2D::from_translation(3.0, 1.0));

        let t = core.degrade(DegradeReason::InsufficientFeatures);
        assert_eq!(t.translation(), (3.0, 1.0));
        assert_eq!(core.state(), TrackingState::Reacquiring);

        core.reset();
        assert!(core.previous().is_identity(0.0));
        assert_eq!(core.state(), TrackingState::Ready);
    }

    #[test]
    fn test_create_estimator_checks_capabilities() {
        let empty = VisionContext::empty();
        assert!(create_estimator(AlgorithmKind::Feature, &empty, EstimatorTuning::default()).is_err());
        let sensor = create_estimator(AlgorithmKind::Sensor, &empty, EstimatorTuning::default()).unwrap();
        assert_eq!(sensor.kind(), AlgorithmKind::Sensor);

        let native = VisionContext::native();
        for kind in AlgorithmKind::ALL {
            let estimator = create_estimator(*kind, &native, EstimatorTuning::default()).unwrap();
            assert_eq!(estimator.kind(), *kind);
            assert_eq!(estimator.state(), TrackingState::Uninitialized);
        }
        assert!(native.is_initialized());
    }
}
