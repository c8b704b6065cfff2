//! Correspondence capabilities consumed by the motion estimators.
//!
//! The estimators only depend on the traits in this module:
//! - [`FeatureDetector`]: keypoints with binary descriptors, and plain corners
//! - [`DescriptorMatcher`]: nearest-neighbour descriptor matching
//! - [`FlowTracker`]: sparse optical flow with per-point status
//! - [`HomographySolver`]: robust homography fit with an inlier mask
//!
//! Pure-Rust default implementations live in the submodules and are
//! wired together by [`crate::context::VisionContext::native`].

pub mod corners;
pub mod frame;
pub mod homography;
pub mod lk;
pub mod matcher;

use image::GrayImage;
use nalgebra::{Matrix3, Point2};

pub use corners::ShiTomasiDetector;
pub use frame::VideoFrame;
pub use homography::RansacHomography;
pub use lk::PyramidalLkTracker;
pub use matcher::HammingMatcher;

/// 256-bit binary descriptor.
pub type Descriptor = [u8; 32];

/// A detected keypoint with its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Position in pixels
    pub point: Point2<f64>,
    /// Detector response, higher is stronger
    pub response: f64,
    pub descriptor: Descriptor,
}

impl Feature {
    pub fn new(x: f64, y: f64, response: f64, descriptor: Descriptor) -> Self {
        Self {
            point: Point2::new(x, y),
            response,
            descriptor,
        }
    }
}

/// A query/train descriptor pairing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    /// Index into the query (reference) features
    pub query: usize,
    /// Index into the train (current) features
    pub train: usize,
    pub distance: f64,
}

/// Outcome of tracking one point into the next frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPoint {
    /// Position in the current frame
    pub point: Point2<f64>,
    /// Whether tracking converged inside the image
    pub found: bool,
    /// Mean absolute intensity residual over the tracking window
    pub error: f64,
}

impl TrackedPoint {
    pub fn lost(point: Point2<f64>) -> Self {
        Self {
            point,
            found: false,
            error: f64::INFINITY,
        }
    }
}

/// A robustly fitted homography.
#[derive(Debug, Clone, PartialEq)]
pub struct HomographyFit {
    /// Maps source points onto destination points
    pub matrix: Matrix3<f64>,
    /// One flag per input correspondence
    pub inliers: Vec<bool>,
}

impl HomographyFit {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&inlier| inlier).count()
    }

    /// Fraction of correspondences consistent with the model.
    pub fn inlier_ratio(&self) -> f64 {
        if self.inliers.is_empty() {
            return 0.0;
        }
        self.inlier_count() as f64 / self.inliers.len() as f64
    }
}

/// Keypoint and corner detection.
pub trait FeatureDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Detect up to `max_features` keypoints with descriptors, strongest first.
    fn detect_features(&self, image: &GrayImage, max_features: usize) -> Vec<Feature>;

    /// Detect up to `max_corners` trackable corners, strongest first.
    fn detect_corners(&self, image: &GrayImage, max_corners: usize) -> Vec<Point2<f64>>;
}

/// Descriptor matching.
pub trait DescriptorMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Best train match for each query feature.
    fn match_features(&self, query: &[Feature], train: &[Feature]) -> Vec<FeatureMatch>;
}

/// Sparse optical flow.
pub trait FlowTracker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Track `points` from `prev` into `curr`; output is index-aligned with `points`.
    fn track(&self, prev: &GrayImage, curr: &GrayImage, points: &[Point2<f64>]) -> Vec<TrackedPoint>;
}

/// Robust homography estimation.
pub trait HomographySolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fit `dst ~ H · src`, treating pairs within `reprojection_threshold`
    /// pixels as inliers. `None` when no model can be fitted.
    fn find_homography(
        &self,
        src: &[Point2<f64>],
        dst: &[Point2<f64>],
        reprojection_threshold: f64,
    ) -> Option<HomographyFit>;
}
