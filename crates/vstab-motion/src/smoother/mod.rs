//! Trajectory smoothing.
//!
//! Smoothers consume cumulative transforms one at a time and keep the
//! original and smoothed sequences index-aligned. Three strategies exist:
//! - [`GaussianSmoother`]: symmetric window, revises recent outputs as
//!   future samples arrive (offline only)
//! - [`KalmanSmoother`]: causal constant-velocity filter
//! - [`AdaptiveSmoother`]: picks between the two by motion intensity

pub mod adaptive;
pub mod gaussian;
pub mod kalman;

use vstab_models::{ProcessingMode, SmootherKind, Transform2D};

pub use adaptive::{AdaptiveSmoother, AdaptiveTuning};
pub use gaussian::{GaussianKernel, GaussianSmoother};
pub use kalman::{ConstantVelocityFilter, KalmanSmoother};

/// Incremental trajectory smoother.
pub trait MotionSmoother: Send {
    fn kind(&self) -> SmootherKind;

    /// Set the window (frames per side) and strength in [0, 1].
    ///
    /// Discards any accumulated samples.
    fn initialize(&mut self, window_size: usize, strength: f64);

    /// Append a transform; returns its smoothed value as known so far.
    fn add_transform(&mut self, transform: Transform2D, timestamp_ms: i64) -> Transform2D;

    fn history(&self) -> &SmootherHistory;

    /// Smoothed transform at `index`, identity when out of range.
    fn smooth_transform(&self, index: usize) -> Transform2D {
        self.history().smoothed(index)
    }

    fn smooth_transforms(&self) -> &[Transform2D] {
        self.history().smoothed_all()
    }

    fn len(&self) -> usize {
        self.history().len()
    }

    fn is_empty(&self) -> bool {
        self.history().is_empty()
    }

    /// Clear the sequences, keeping the configuration.
    fn reset(&mut self);

    /// Clear everything, including the configuration.
    fn release(&mut self);

    /// True if outputs never change once returned.
    fn is_causal(&self) -> bool;
}

/// Index-aligned original and smoothed sequences.
#[derive(Debug, Clone, Default)]
pub struct SmootherHistory {
    original: Vec<Transform2D>,
    smoothed: Vec<Transform2D>,
    timestamps: Vec<i64>,
}

impl SmootherHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an original with a provisional smoothed value; returns its index.
    pub fn push(&mut self, original: Transform2D, smoothed: Transform2D, timestamp_ms: i64) -> usize {
        self.original.push(original);
        self.smoothed.push(smoothed);
        self.timestamps.push(timestamp_ms);
        self.original.len() - 1
    }

    /// Overwrite an already stored smoothed value.
    pub fn set_smoothed(&mut self, index: usize, smoothed: Transform2D) {
        if let Some(slot) = self.smoothed.get_mut(index) {
            *slot = smoothed;
        }
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    pub fn original(&self, index: usize) -> Transform2D {
        self.original.get(index).copied().unwrap_or_default()
    }

    pub fn smoothed(&self, index: usize) -> Transform2D {
        self.smoothed.get(index).copied().unwrap_or_default()
    }

    pub fn originals(&self) -> &[Transform2D] {
        &self.original
    }

    pub fn smoothed_all(&self) -> &[Transform2D] {
        &self.smoothed
    }

    pub fn timestamp(&self, index: usize) -> Option<i64> {
        self.timestamps.get(index).copied()
    }

    pub fn last_smoothed(&self) -> Option<Transform2D> {
        self.smoothed.last().copied()
    }

    pub fn clear(&mut self) {
        self.original.clear();
        self.smoothed.clear();
        self.timestamps.clear();
    }
}

/// Build and initialize the smoother for `kind`.
///
/// In realtime mode a Gaussian request falls back to Kalman, and the
/// adaptive smoother is restricted to causal strategies.
pub fn create_smoother(
    kind: SmootherKind,
    window_size: usize,
    strength: f64,
    mode: ProcessingMode,
) -> Box<dyn MotionSmoother> {
    create_smoother_with(kind, window_size, strength, mode, AdaptiveTuning::default())
}

pub fn create_smoother_with(
    kind: SmootherKind,
    window_size: usize,
    strength: f64,
    mode: ProcessingMode,
    adaptive: AdaptiveTuning,
) -> Box<dyn MotionSmoother> {
    let mut smoother: Box<dyn MotionSmoother> = match kind {
        SmootherKind::Gaussian if !mode.is_realtime() => Box::new(GaussianSmoother::new()),
        SmootherKind::Gaussian | SmootherKind::Kalman => Box::new(KalmanSmoother::new()),
        SmootherKind::Adaptive => Box::new(AdaptiveSmoother::with_tuning(adaptive, mode.is_realtime())),
    };
    smoother.initialize(window_size, strength);
    smoother
}

/// Clamp a strength into [0, 1], mapping NaN to 0.
pub(crate) fn clamp_strength(strength: f64) -> f64 {
    if strength.is_nan() {
        0.0
    } else {
        strength.clamp(0.0, 1.0)
    }
}
