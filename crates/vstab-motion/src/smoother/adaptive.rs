//! Motion-intensity driven smoother selection.
//!
//! Motion intensity is the mean absolute per-frame change of rotation and
//! translation over the most recent samples. With a frame size set,
//! translation is measured as a fraction of the frame width and height,
//! so the thresholds do not depend on resolution. Calm footage selects the
//! Gaussian strategy and widens/strengthens it step by step; shaky footage
//! selects Kalman and narrows/weakens it. In between, the current choice
//! is kept.
//!
//! The Kalman filter sees every sample even while Gaussian is active and
//! always runs at the current strength. A re-configured filter is seeded
//! from its own latest estimate, so a switch never makes the output jump.

use serde::{Deserialize, Serialize};
use tracing::debug;
use vstab_models::{MotionParams, SmootherKind, Transform2D};

use super::gaussian::recompose;
use super::{clamp_strength, ConstantVelocityFilter, GaussianKernel, MotionSmoother, SmootherHistory};
use crate::metrics;

/// Thresholds and step sizes for strategy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveTuning {
    /// Below this intensity footage counts as calm (default: 0.01)
    pub low_motion_threshold: f64,
    /// Above this intensity footage counts as shaky (default: 0.1)
    pub high_motion_threshold: f64,
    /// Samples considered for intensity (default: 10)
    pub velocity_window: usize,
    /// Window change per adaptation step (default: 5)
    pub window_step: usize,
    /// Window bounds (default: 5..=60)
    pub min_window: usize,
    pub max_window: usize,
    /// Strength change per adaptation step (default: 0.1)
    pub strength_step: f64,
    /// Strength bounds (default: 0.1..=1.0)
    pub min_strength: f64,
    pub max_strength: f64,
    /// Frame width and height that translations are divided by (default: none)
    pub frame_size: Option<(u32, u32)>,
}

impl Default for AdaptiveTuning {
    fn default() -> Self {
        Self {
            low_motion_threshold: 0.01,
            high_motion_threshold: 0.1,
            velocity_window: 10,
            window_step: 5,
            min_window: 5,
            max_window: 60,
            strength_step: 0.1,
            min_strength: 0.1,
            max_strength: 1.0,
            frame_size: None,
        }
    }
}

impl AdaptiveTuning {
    /// Default thresholds for frames of `width` × `height` pixels.
    pub fn for_frame(width: u32, height: u32) -> Self {
        Self {
            frame_size: Some((width, height)),
            ..Self::default()
        }
    }

    /// Divisors turning translation into frame-relative units.
    pub fn translation_scale(&self) -> (f64, f64) {
        match self.frame_size {
            Some((w, h)) if w > 0 && h > 0 => (w as f64, h as f64),
            _ => (1.0, 1.0),
        }
    }
}

/// Mean absolute per-sample change of rotation and translation over the
/// last `window` samples, translation divided by `scale`. Zero with fewer
/// than two samples.
pub fn motion_intensity(params: &[[f64; MotionParams::LEN]], window: usize, scale: (f64, f64)) -> f64 {
    let start = params.len().saturating_sub(window.max(2));
    let recent = &params[start..];
    if recent.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    for pair in recent.windows(2) {
        total += (pair[1][2] - pair[0][2]).abs();
        total += (pair[1][3] - pair[0][3]).abs() / scale.0;
        total += (pair[1][4] - pair[0][4]).abs() / scale.1;
    }
    total / ((recent.len() - 1) * 3) as f64
}

pub struct AdaptiveSmoother {
    tuning: AdaptiveTuning,
    causal_only: bool,
    configured: (usize, f64),
    window_size: usize,
    strength: f64,
    active: SmootherKind,
    kernel: GaussianKernel,
    filter: ConstantVelocityFilter,
    params: Vec<[f64; MotionParams::LEN]>,
    selections: Vec<SmootherKind>,
    history: SmootherHistory,
}

impl AdaptiveSmoother {
    pub fn new() -> Self {
        Self::with_tuning(AdaptiveTuning::default(), false)
    }

    /// `causal_only` keeps the smoother on Kalman for streaming use.
    pub fn with_tuning(tuning: AdaptiveTuning, causal_only: bool) -> Self {
        Self {
            tuning,
            causal_only,
            configured: (0, 0.0),
            window_size: 0,
            strength: 0.0,
            active: SmootherKind::Kalman,
            kernel: GaussianKernel::new(0, 0.0),
            filter: ConstantVelocityFilter::new(0.0),
            params: Vec::new(),
            selections: Vec::new(),
            history: SmootherHistory::new(),
        }
    }

    /// Strategy currently producing outputs.
    pub fn active(&self) -> SmootherKind {
        self.active
    }

    /// Strategy used for each stored sample.
    pub fn selections(&self) -> &[SmootherKind] {
        &self.selections
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn filter_strength(&self) -> f64 {
        self.filter.strength()
    }

    pub fn intensity(&self) -> f64 {
        motion_intensity(&self.params, self.tuning.velocity_window, self.tuning.translation_scale())
    }

    /// Back to the configured window and strength with no samples.
    fn restart(&mut self) {
        (self.window_size, self.strength) = self.configured;
        self.active = SmootherKind::Kalman;
        self.kernel = GaussianKernel::new(self.window_size, self.strength);
        self.filter = ConstantVelocityFilter::new(self.strength);
        self.params.clear();
        self.selections.clear();
        self.history.clear();
    }

    fn select(&mut self, kind: SmootherKind, intensity: f64) {
        if self.active != kind {
            debug!(from = %self.active, to = %kind, intensity, "Switching smoothing strategy");
            metrics::record_smoother_switch(kind.as_str());
            self.active = kind;
        }
    }

    /// Move window and strength one step. On a change both strategies take
    /// the new values and an active Kalman filter is re-seeded.
    fn adapt(&mut self, grow: bool) {
        let t = &self.tuning;
        let (window, strength) = if grow {
            (
                (self.window_size + t.window_step).min(t.max_window),
                (self.strength + t.strength_step).min(t.max_strength),
            )
        } else {
            (
                self.window_size.saturating_sub(t.window_step).max(t.min_window),
                (self.strength - t.strength_step).max(t.min_strength),
            )
        };
        if window == self.window_size && (strength - self.strength).abs() < 1e-12 {
            return;
        }
        self.window_size = window;
        self.strength = strength;

        self.kernel = GaussianKernel::new(window, strength);
        self.filter.set_strength(strength);
        if self.active == SmootherKind::Kalman {
            let latest = self.filter.position();
            self.filter.seed(&latest);
        }
    }
}

impl Default for AdaptiveSmoother {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSmoother for AdaptiveSmoother {
    fn kind(&self) -> SmootherKind {
        SmootherKind::Adaptive
    }

    fn initialize(&mut self, window_size: usize, strength: f64) {
        self.configured = (window_size, clamp_strength(strength));
        self.restart();
    }

    fn add_transform(&mut self, transform: Transform2D, timestamp_ms: i64) -> Transform2D {
        let values = transform.params();
        self.params.push(values.to_array());
        let filtered = self.filter.step(&values);

        let intensity = self.intensity();
        metrics::record_motion_intensity(intensity);
        if intensity < self.tuning.low_motion_threshold {
            if !self.causal_only {
                self.select(SmootherKind::Gaussian, intensity);
            }
            self.adapt(true);
        } else if intensity > self.tuning.high_motion_threshold {
            self.select(SmootherKind::Kalman, intensity);
            self.adapt(false);
        }

        let newest = self.params.len() - 1;
        let smoothed = match self.active {
            SmootherKind::Gaussian => {
                let value = recompose(self.kernel.smooth_at(&self.params, newest), transform);
                // Earlier Gaussian outputs can now see this sample.
                for i in newest.saturating_sub(self.kernel.radius())..newest {
                    if self.selections[i] == SmootherKind::Gaussian {
                        let revised = recompose(self.kernel.smooth_at(&self.params, i), self.history.original(i));
                        self.history.set_smoothed(i, revised);
                    }
                }
                value
            }
            _ => Transform2D::from_params(&filtered).unwrap_or(transform),
        };

        self.selections.push(self.active);
        self.history.push(transform, smoothed, timestamp_ms);
        smoothed
    }

    fn history(&self) -> &SmootherHistory {
        &self.history
    }

    fn reset(&mut self) {
        self.restart();
    }

    fn release(&mut self) {
        *self = Self::with_tuning(self.tuning.clone(), self.causal_only);
    }

    fn is_causal(&self) -> bool {
        self.causal_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smoother(causal_only: bool) -> AdaptiveSmoother {
        let mut smoother = AdaptiveSmoother::with_tuning(AdaptiveTuning::default(), causal_only);
        smoother.initialize(10, 0.5);
        smoother
    }

    #[test]
    fn test_intensity() {
        assert_eq!(motion_intensity(&[], 10, (1.0, 1.0)), 0.0);
        assert_eq!(motion_intensity(&[[1.0, 1.0, 0.0, 5.0, 5.0]], 10, (1.0, 1.0)), 0.0);

        let params = vec![[1.0, 1.0, 0.0, 0.0, 0.0], [1.0, 1.0, 3.0, 6.0, -3.0]];
        assert_eq!(motion_intensity(&params, 10, (1.0, 1.0)), 4.0);
        assert_eq!(motion_intensity(&params, 10, (2.0, 3.0)), 7.0 / 3.0);
    }

    #[test]
    fn test_slow_pan_is_calm_at_frame_scale() {
        let mut smoother = AdaptiveSmoother::with_tuning(AdaptiveTuning::for_frame(1280, 720), false);
        smoother.initialize(10, 0.5);
        for i in 0..60 {
            smoother.add_transform(Transform2D::from_translation(i as f64 * 0.5, 0.0), i);
        }
        assert!(smoother.intensity() < 0.01, "{}", smoother.intensity());
        assert_eq!(smoother.active(), SmootherKind::Gaussian);
        assert_eq!(smoother.window_size(), 60);
    }

    #[test]
    fn test_translation_scale_ignores_empty_frame() {
        assert_eq!(AdaptiveTuning::default().translation_scale(), (1.0, 1.0));
        assert_eq!(AdaptiveTuning::for_frame(0, 480).translation_scale(), (1.0, 1.0));
        assert_eq!(AdaptiveTuning::for_frame(640, 480).translation_scale(), (640.0, 480.0));
    }

    #[test]
    fn test_constant_input_selects_gaussian() {
        let mut smoother = smoother(false);
        let t = Transform2D::from_translation(2.0, 1.0);
        for i in 0..20 {
            smoother.add_transform(t, i);
        }
        assert_eq!(smoother.active(), SmootherKind::Gaussian);
        assert!(smoother.selections().iter().all(|k| *k == SmootherKind::Gaussian));
        assert_eq!(smoother.window_size(), 60);
        assert!((smoother.strength() - 1.0).abs() < 1e-9);
        // The idle filter follows the adapted strength.
        assert!((smoother.filter_strength() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_alternating_input_selects_kalman() {
        let mut smoother = smoother(false);
        for i in 0..20 {
            let tx = if i % 2 == 0 { 5.0 } else { -5.0 };
            smoother.add_transform(Transform2D::from_translation(tx, 0.0), i);
        }
        assert_eq!(smoother.active(), SmootherKind::Kalman);
        assert!(smoother.selections()[1..].iter().all(|k| *k == SmootherKind::Kalman));
        assert_eq!(smoother.window_size(), 5);
        assert!((smoother.strength() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_causal_only_never_selects_gaussian() {
        let mut smoother = smoother(true);
        for i in 0..20 {
            smoother.add_transform(Transform2D::identity(), i);
        }
        assert_eq!(smoother.active(), SmootherKind::Kalman);
        assert!(smoother.is_causal());
        // Calm input still strengthens the filter.
        assert!((smoother.strength() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_switch_does_not_jump() {
        let mut smoother = smoother(false);
        let mut outputs = Vec::new();
        for i in 0..40 {
            let tx = if i < 20 { 1.0 } else if i % 2 == 0 { 1.5 } else { 0.5 };
            outputs.push(smoother.add_transform(Transform2D::from_translation(tx, 0.0), i).translation().0);
        }

        let switch = smoother
            .selections()
            .iter()
            .rposition(|k| *k == SmootherKind::Gaussian)
            .map(|i| i + 1)
            .unwrap();
        assert!(switch > 20 && switch < 40);
        assert_eq!(smoother.selections()[switch], SmootherKind::Kalman);
        assert!((outputs[switch] - outputs[switch - 1]).abs() < 0.75);
        assert!(outputs.iter().all(|v| (0.0..=2.0).contains(v)), "{outputs:?}");
    }

    #[test]
    fn test_reset_restores_configured_values() {
        let mut smoother = smoother(false);
        for i in 0..5 {
            smoother.add_transform(Transform2D::identity(), i);
        }
        assert_eq!(smoother.window_size(), 35);

        smoother.reset();
        assert!(smoother.is_empty());
        assert!(smoother.selections().is_empty());
        assert_eq!(smoother.window_size(), 10);
        assert!((smoother.strength() - 0.5).abs() < 1e-12);
        assert!((smoother.filter_strength() - 0.5).abs() < 1e-12);
        assert_eq!(smoother.active(), SmootherKind::Kalman);
    }

    #[test]
    fn test_first_sample_is_passed_through() {
        let mut smoother = smoother(true);
        let t = Transform2D::from_translation(10.0, -6.0);
        assert!(smoother.add_transform(t, 0).approx_eq(&t, 1e-9));
        for i in 1..20 {
            assert!(smoother.add_transform(t, i).approx_eq(&t, 1e-6));
        }
    }
}
