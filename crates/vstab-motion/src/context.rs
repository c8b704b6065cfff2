//! Shared vision capability context.
//!
//! A [`VisionContext`] is created once at the pipeline root and handed to
//! every estimator by reference. It carries the correspondence providers
//! and the one-time initialization flag, so there is no process-wide
//! mutable state.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::info;
use vstab_models::AlgorithmKind;

use crate::error::{MotionError, MotionResult};
use crate::vision::{
    DescriptorMatcher, FeatureDetector, FlowTracker, HammingMatcher, HomographySolver,
    PyramidalLkTracker, RansacHomography, ShiTomasiDetector,
};

/// Capability providers shared by all estimators of a pipeline.
#[derive(Clone, Default)]
pub struct VisionContext {
    detector: Option<Arc<dyn FeatureDetector>>,
    matcher: Option<Arc<dyn DescriptorMatcher>>,
    tracker: Option<Arc<dyn FlowTracker>>,
    solver: Option<Arc<dyn HomographySolver>>,
    initialized: Arc<OnceLock<()>>,
}

impl VisionContext {
    /// A context with no providers; only sensor estimation will work.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A context wired with the built-in pure-Rust providers.
    pub fn native() -> Self {
        Self::builder()
            .detector(Arc::new(ShiTomasiDetector::new()))
            .matcher(Arc::new(HammingMatcher::new()))
            .tracker(Arc::new(PyramidalLkTracker::new()))
            .solver(Arc::new(RansacHomography::new()))
            .build()
    }

    pub fn builder() -> VisionContextBuilder {
        VisionContextBuilder::default()
    }

    /// Run one-time setup. Safe to call any number of times.
    pub fn ensure_initialized(&self) {
        self.initialized.get_or_init(|| {
            info!(
                detector = provider_name(self.detector.as_deref().map(|p| p.name())),
                matcher = provider_name(self.matcher.as_deref().map(|p| p.name())),
                tracker = provider_name(self.tracker.as_deref().map(|p| p.name())),
                solver = provider_name(self.solver.as_deref().map(|p| p.name())),
                "Vision context initialized"
            );
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get().is_some()
    }

    /// Check that every capability `algorithm` needs is present.
    pub fn require(&self, algorithm: AlgorithmKind) -> MotionResult<()> {
        match algorithm {
            AlgorithmKind::Feature => {
                self.detector(algorithm)?;
                self.matcher(algorithm)?;
                self.solver(algorithm)?;
            }
            AlgorithmKind::OpticalFlow | AlgorithmKind::Hybrid => {
                self.detector(algorithm)?;
                self.tracker(algorithm)?;
                self.solver(algorithm)?;
            }
            AlgorithmKind::Sensor => {}
        }
        Ok(())
    }

    pub fn detector(&self, algorithm: AlgorithmKind) -> MotionResult<Arc<dyn FeatureDetector>> {
        self.detector
            .clone()
            .ok_or_else(|| MotionError::capability_missing("feature detector", algorithm))
    }

    pub fn matcher(&self, algorithm: AlgorithmKind) -> MotionResult<Arc<dyn DescriptorMatcher>> {
        self.matcher
            .clone()
            .ok_or_else(|| MotionError::capability_missing("descriptor matcher", algorithm))
    }

    pub fn tracker(&self, algorithm: AlgorithmKind) -> MotionResult<Arc<dyn FlowTracker>> {
        self.tracker
            .clone()
            .ok_or_else(|| MotionError::capability_missing("flow tracker", algorithm))
    }

    pub fn solver(&self, algorithm: AlgorithmKind) -> MotionResult<Arc<dyn HomographySolver>> {
        self.solver
            .clone()
            .ok_or_else(|| MotionError::capability_missing("homography solver", algorithm))
    }
}

fn provider_name(name: Option<&'static str>) -> &'static str {
    name.unwrap_or("none")
}

impl fmt::Debug for VisionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionContext")
            .field("detector", &self.detector.as_deref().map(|p| p.name()))
            .field("matcher", &self.matcher.as_deref().map(|p| p.name()))
            .field("tracker", &self.tracker.as_deref().map(|p| p.name()))
            .field("solver", &self.solver.as_deref().map(|p| p.name()))
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Builder for [`VisionContext`], used to inject custom providers.
#[derive(Default)]
pub struct VisionContextBuilder {
    context: VisionContext,
}

impl VisionContextBuilder {
    pub fn detector(mut self, detector: Arc<dyn FeatureDetector>) -> Self {
        self.context.detector = Some(detector);
        self
    }

    pub fn matcher(mut self, matcher: Arc<dyn DescriptorMatcher>) -> Self {
        self.context.matcher = Some(matcher);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn FlowTracker>) -> Self {
        self.context.tracker = Some(tracker);
        self
    }

    pub fn solver(mut self, solver: Arc<dyn HomographySolver>) -> Self {
        self.context.solver = Some(solver);
        self
    }

    pub fn build(self) -> VisionContext {
        self.context
    }
}
