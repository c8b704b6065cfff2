//! Keypoint-based motion estimation.
//!
//! Reference keypoints are matched against the current frame's keypoints;
//! matches worse than `match_distance_factor` times the best match are
//! dropped before the robust fit. The current keypoints always become the
//! next reference, whether or not the fit succeeded.

use std::sync::Arc;

use nalgebra::Point2;
use vstab_models::{AlgorithmKind, Transform2D};

use super::{EstimatorCore, EstimatorTuning, MotionEstimator, TrackingState};
use crate::context::VisionContext;
use crate::error::MotionResult;
use crate::metrics::DegradeReason;
use crate::vision::{DescriptorMatcher, Feature, FeatureDetector, FeatureMatch, HomographySolver, VideoFrame};

pub struct FeatureMotionEstimator {
    detector: Arc<dyn FeatureDetector>,
    matcher: Arc<dyn DescriptorMatcher>,
    solver: Arc<dyn HomographySolver>,
    core: EstimatorCore,
    reference: Vec<Feature>,
}

impl FeatureMotionEstimator {
    pub fn new(context: &VisionContext, tuning: EstimatorTuning) -> MotionResult<Self> {
        let kind = AlgorithmKind::Feature;
        Ok(Self {
            detector: context.detector(kind)?,
            matcher: context.matcher(kind)?,
            solver: context.solver(kind)?,
            core: EstimatorCore::new(kind, tuning),
            reference: Vec::new(),
        })
    }

    /// Number of keypoints in the current reference.
    pub fn reference_len(&self) -> usize {
        self.reference.len()
    }

    /// Fold a set of point correspondences into the trajectory.
    ///
    /// Applies the same gates as [`MotionEstimator::estimate_motion`] after
    /// matching: too few pairs, a failed fit or a low inlier ratio leave the
    /// cumulative transform unchanged.
    pub fn estimate_from_correspondences(&mut self, src: &[Point2<f64>], dst: &[Point2<f64>]) -> Transform2D {
        if !self.core.begin_frame() {
            return self.core.previous();
        }
        match self.core.fit(self.solver.as_ref(), src, dst) {
            Ok(estimate) => estimate.transform,
            Err(reason) => self.core.degrade(reason),
        }
    }

    /// Keep matches within `factor` times the best distance.
    ///
    /// The bound is inclusive so identical frames, where every distance is
    /// zero, keep all their matches.
    pub fn filter_matches(matches: &[FeatureMatch], factor: f64) -> Vec<FeatureMatch> {
        let Some(best) = matches.iter().map(|m| m.distance).min_by(f64::total_cmp) else {
            return Vec::new();
        };
        let bound = best * factor;
        matches.iter().copied().filter(|m| m.distance <= bound).collect()
    }

    fn track(&mut self, current: Vec<Feature>) -> Transform2D {
        let min_points = self.core.tuning().min_points;
        if current.len() < min_points {
            self.reference = current;
            self.core.record_reacquisition();
            return self.core.degrade(DegradeReason::InsufficientFeatures);
        }

        let matches = self.matcher.match_features(&self.reference, &current);
        let good = Self::filter_matches(&matches, self.core.tuning().match_distance_factor);
        if good.len() < min_points {
            self.reference = current;
            return self.core.degrade(DegradeReason::InsufficientMatches);
        }

        let src: Vec<_> = good.iter().map(|m| self.reference[m.query].point).collect();
        let dst: Vec<_> = good.iter().map(|m| current[m.train].point).collect();
        self.reference = current;

        match self.core.fit(self.solver.as_ref(), &src, &dst) {
            Ok(estimate) => estimate.transform,
            Err(reason) => self.core.degrade(reason),
        }
    }
}

impl MotionEstimator for FeatureMotionEstimator {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Feature
    }

    fn initialize(&mut self, width: u32, height: u32) -> MotionResult<()> {
        self.reference.clear();
        self.core.initialize(width, height)
    }

    fn estimate_motion(&mut self, prev: &VideoFrame, curr: &VideoFrame) -> Transform2D {
        if !self.core.begin_frame() {
            return self.core.previous();
        }
        let max_features = self.core.tuning().max_features;
        let min_points = self.core.tuning().min_points;

        if self.reference.is_empty() && self.core.state() == TrackingState::Ready {
            self.reference = self.detector.detect_features(&prev.image, max_features);
        }

        let current = self.detector.detect_features(&curr.image, max_features);
        if self.reference.len() < min_points {
            self.reference = current;
            self.core.record_reacquisition();
            return self.core.degrade(DegradeReason::InsufficientFeatures);
        }

        self.track(current)
    }

    fn reset(&mut self) {
        self.reference.clear();
        self.core.reset();
    }

    fn release(&mut self) {
        self.reference = Vec::new();
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

    fn estimator() -> FeatureMotionEstimator {
        let mut estimator = FeatureMotionEstimator::new(&VisionContext::native(), EstimatorTuning::default()).unwrap();
        estimator.initialize(160, 160).unwrap();
        estimator
    }

    fn grid() -> Vec<Point2<f64>> {
        (0..30)
            .map(|i| Point2::new(10.0 + (i % 6) as f64 * 17.0, 12.0 + (i / 6) as f64 * 13.0))
            .collect()
    }

    #[test]
    fn test_filter_matches_is_inclusive() {
        let m = |distance| FeatureMatch { query: 0, train: 0, distance };
        let all_zero = vec![m(0.0), m(0.0), m(0.0)];
        assert_eq!(FeatureMotionEstimator::filter_matches(&all_zero, 3.0).len(), 3);

        let mixed = vec![m(2.0), m(6.0), m(6.5), m(40.0)];
        let kept = FeatureMotionEstimator::filter_matches(&mixed, 3.0);
        assert_eq!(kept.len(), 2);
        assert!(FeatureMotionEstimator::filter_matches(&[], 3.0).is_empty());
    }

    #[test]
    fn test_correspondences_recover_translation() {
        let mut estimator = estimator();
        let src = grid();
        let dst: Vec<_> = src.iter().map(|p| Point2::new(p.x + 5.0, p.y)).collect();

        let t = estimator.estimate_from_correspondences(&src, &dst);
        let (tx, ty) = t.translation();
        assert!((tx - 5.0).abs() < 1e-6);
        assert!(ty.abs() < 1e-6);
    }

    #[test]
    fn test_too_few_correspondences_return_previous() {
        let mut estimator = estimator();
        let src = grid();
        let dst: Vec<_> = src.iter().map(|p| Point2::new(p.x + 2.0, p.y - 1.0)).collect();
        let first = estimator.estimate_from_correspondences(&src, &dst);

        let t = estimator.estimate_from_correspondences(&src[..5], &dst[..5]);
        assert_eq!(t, first);
        assert_eq!(estimator.state(), TrackingState::Reacquiring);
    }

    #[test]
    fn test_identical_frames_give_identity() {
        let mut estimator = estimator();
        let frame = VideoFrame::new(textured_image(160, 160, (0, 0)), 0, 0);
        let next = VideoFrame::new(textured_image(160, 160, (0, 0)), 1, 33);

        let t = estimator.estimate_motion(&frame, &next);
        assert!(t.is_identity(1e-6), "{t:?}");
        assert_eq!(estimator.state(), TrackingState::Tracking);
    }

    #[test]
    fn test_frames_recover_shift() {
        let mut estimator = estimator();
        let prev = VideoFrame::new(textured_image(160, 160, (0, 0)), 0, 0);
        let curr = VideoFrame::new(textured_image(160, 160, (4, 3)), 1, 33);

        let (tx, ty) = estimator.estimate_motion(&prev, &curr).translation();
        assert!((tx - 4.0).abs() < 0.5, "tx {tx}");
        assert!((ty - 3.0).abs() < 0.5, "ty {ty}");
    }

    #[test]
    fn test_flat_frames_degrade_to_identity() {
        let mut estimator = estimator();
        let flat = VideoFrame::blank(160, 160, 0, 0);
        let t = estimator.estimate_motion(&flat, &VideoFrame::blank(160, 160, 1, 33));
        assert!(t.is_identity(0.0));
        assert_eq!(estimator.state(), TrackingState::Reacquiring);
    }

    #[test]
    fn test_uninitialized_returns_identity() {
        let mut estimator = FeatureMotionEstimator::new(&VisionContext::native(), EstimatorTuning::default()).unwrap();
        let frame = VideoFrame::new(textured_image(160, 160, (0, 0)), 0, 0);
        assert!(estimator.estimate_motion(&frame, &frame).is_identity(0.0));
        assert_eq!(estimator.state(), TrackingState::Uninitialized);
    }
}
