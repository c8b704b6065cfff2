//! Corner tracking with sparse optical flow.
//!
//! Reference corners are tracked from the previous frame into the current
//! one. The RANSAC inliers of a successful fit become the next reference,
//! so the point set slowly shrinks; once it falls under `min_points` it is
//! re-detected on the previous frame at the start of the next call.

use std::sync::Arc;

use nalgebra::Point2;
use vstab_models::{AlgorithmKind, Transform2D};

use super::{EstimatorCore, EstimatorTuning, MotionEstimator, TrackingState};
use crate::context::VisionContext;
use crate::error::MotionResult;
use crate::metrics::DegradeReason;
use crate::vision::{FeatureDetector, FlowTracker, HomographySolver, VideoFrame};

pub struct OpticalFlowMotionEstimator {
    detector: Arc<dyn FeatureDetector>,
    tracker: Arc<dyn FlowTracker>,
    solver: Arc<dyn HomographySolver>,
    core: EstimatorCore,
    reference: Vec<Point2<f64>>,
    force_reacquire: bool,
}

impl OpticalFlowMotionEstimator {
    pub fn new(context: &VisionContext, tuning: EstimatorTuning) -> MotionResult<Self> {
        Self::with_kind(context, tuning, AlgorithmKind::OpticalFlow)
    }

    /// Build with `kind` reported in capability errors.
    pub(crate) fn with_kind(context: &VisionContext, tuning: EstimatorTuning, kind: AlgorithmKind) -> MotionResult<Self> {
        Ok(Self {
            detector: context.detector(kind)?,
            tracker: context.tracker(kind)?,
            solver: context.solver(kind)?,
            core: EstimatorCore::new(AlgorithmKind::OpticalFlow, tuning),
            reference: Vec::new(),
            force_reacquire: false,
        })
    }

    pub fn reference_len(&self) -> usize {
        self.reference.len()
    }

    fn detect_reference(&mut self, frame: &VideoFrame) {
        self.reference = self
            .detector
            .detect_corners(&frame.image, self.core.tuning().max_features);
        self.force_reacquire = false;
    }
}

impl MotionEstimator for OpticalFlowMotionEstimator {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::OpticalFlow
    }

    fn initialize(&mut self, width: u32, height: u32) -> MotionResult<()> {
        self.reference.clear();
        self.force_reacquire = false;
        self.core.initialize(width, height)
    }

    fn estimate_motion(&mut self, prev: &VideoFrame, curr: &VideoFrame) -> Transform2D {
        if !self.core.begin_frame() {
            return self.core.previous();
        }
        let min_points = self.core.tuning().min_points;

        if self.force_reacquire || self.reference.len() < min_points {
            if self.core.state() != TrackingState::Ready {
                self.core.record_reacquisition();
            }
            self.detect_reference(prev);
            if self.reference.len() < min_points {
                // Try again from this frame on the next call.
                self.reference.clear();
                return self.core.degrade(DegradeReason::InsufficientFeatures);
            }
        }

        let tracked = self.tracker.track(&prev.image, &curr.image, &self.reference);
        let (src, dst): (Vec<_>, Vec<_>) = self
            .reference
            .iter()
            .zip(&tracked)
            .filter(|(_, t)| t.found)
            .map(|(p, t)| (*p, t.point))
            .unzip();

        if dst.len() < min_points / 2 {
            self.force_reacquire = true;
        }
        if dst.len() < min_points {
            self.reference.clear();
            return self.core.degrade(DegradeReason::InsufficientMatches);
        }

        match self.core.fit(self.solver.as_ref(), &src, &dst) {
            Ok(estimate) => {
                self.reference = dst
                    .into_iter()
                    .zip(estimate.inliers)
                    .filter_map(|(p, inlier)| inlier.then_some(p))
                    .collect();
                estimate.transform
            }
            Err(reason) => {
                self.force_reacquire = true;
                self.core.degrade(reason)
            }
        }
    }

    fn reset(&mut self) {
        self.reference.clear();
        self.force_reacquire = false;
        self.core.reset();
    }

    fn release(&mut self) {
        self.reference = Vec::new();
        self.force_reacquire = false;
        self.core.release();
    }

    fn state(&self) -> TrackingState {
        self.core.state()
    }

    fn previous_transform(&self) -> Transform2D {
        self.core.previous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::corners::tests::textured_image;
    use crate::vision::{FlowTracker, TrackedPoint};
    use image::GrayImage;

    fn frame(offset: (i32, i32), index: u64) -> VideoFrame {
        VideoFrame::new(textured_image(160, 120, offset), index, index as i64 * 33)
    }

    fn estimator(context: &VisionContext) -> OpticalFlowMotionEstimator {
        let mut estimator = OpticalFlowMotionEstimator::new(context, EstimatorTuning::default()).unwrap();
        estimator.initialize(160, 120).unwrap();
        estimator
    }

    /// Tracker that loses every point.
    struct BlindTracker;

    impl FlowTracker for BlindTracker {
        fn name(&self) -> &'static str {
            "blind"
        }

        fn track(&self, _: &GrayImage, _: &GrayImage, points: &[Point2<f64>]) -> Vec<TrackedPoint> {
            points.iter().map(|&p| TrackedPoint::lost(p)).collect()
        }
    }

    #[test]
    fn test_identical_frames_give_identity() {
        let mut estimator = estimator(&VisionContext::native());
        let t = estimator.estimate_motion(&frame((0, 0), 0), &frame((0, 0), 1));
        assert!(t.is_identity(1e-3), "{t:?}");
        assert_eq!(estimator.state(), TrackingState::Tracking);
        assert!(estimator.reference_len() >= 10);
    }

    #[test]
    fn test_tracks_accumulated_shift() {
        let mut estimator = estimator(&VisionContext::native());
        let frames = [frame((0, 0), 0), frame((2, 1), 1), frame((4, 2), 2)];

        estimator.estimate_motion(&frames[0], &frames[1]);
        let (tx, ty) = estimator.estimate_motion(&frames[1], &frames[2]).translation();
        assert!((tx - 4.0).abs() < 0.5, "tx {tx}");
        assert!((ty - 2.0).abs() < 0.5, "ty {ty}");
    }

    #[test]
    fn test_lost_points_force_reacquire() {
        let native = VisionContext::native();
        let context = VisionContext::builder()
            .detector(native.detector(AlgorithmKind::OpticalFlow).unwrap())
            .solver(native.solver(AlgorithmKind::OpticalFlow).unwrap())
            .tracker(Arc::new(BlindTracker))
            .build();
        let mut estimator = estimator(&context);

        let t = estimator.estimate_motion(&frame((0, 0), 0), &frame((1, 0), 1));
        assert!(t.is_identity(0.0));
        assert_eq!(estimator.state(), TrackingState::Reacquiring);
        assert!(estimator.force_reacquire);
        assert_eq!(estimator.reference_len(), 0);
    }

    #[test]
    fn test_featureless_frames_degrade() {
        let mut estimator = estimator(&VisionContext::native());
        let blank = VideoFrame::blank(160, 120, 0, 0);
        let t = estimator.estimate_motion(&blank, &VideoFrame::blank(160, 120, 1, 33));
        assert!(t.is_identity(0.0));
        assert_eq!(estimator.state(), TrackingState::Reacquiring);
    }

    #[test]
    fn test_reset_clears_trajectory() {
        let mut estimator = estimator(&VisionContext::native());
        estimator.estimate_motion(&frame((0, 0), 0), &frame((3, 0), 1));
        estimator.reset();
        assert!(estimator.previous_transform().is_identity(0.0));
        assert_eq!(estimator.reference_len(), 0);
        assert_eq!(estimator.state(), TrackingState::Ready);
    }
}
