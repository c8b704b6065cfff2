//! Symmetric Gaussian smoothing of decomposed motion parameters.

use rayon::prelude::*;
use vstab_models::{MotionParams, SmootherKind, Transform2D};

use super::{clamp_strength, MotionSmoother, SmootherHistory};

/// Ratio between the Gaussian sigma and the window size at full strength.
const SIGMA_PER_WINDOW: f64 = 0.3;

/// Normalized Gaussian weights over offsets `-radius..=radius`.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    radius: usize,
    weights: Vec<f64>,
}

impl GaussianKernel {
    /// Kernel with `sigma = window_size * 0.3 * strength`.
    ///
    /// A zero sigma degenerates to a unit impulse, i.e. no smoothing.
    pub fn new(window_size: usize, strength: f64) -> Self {
        let radius = window_size;
        let sigma = window_size as f64 * SIGMA_PER_WINDOW * clamp_strength(strength);

        let mut weights: Vec<f64> = (0..=2 * radius)
            .map(|i| {
                let offset = i as f64 - radius as f64;
                if sigma <= f64::EPSILON {
                    if offset == 0.0 { 1.0 } else { 0.0 }
                } else {
                    (-(offset * offset) / (2.0 * sigma * sigma)).exp()
                }
            })
            .collect();
        let sum: f64 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= sum);

        Self { radius, weights }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Weight for a signed offset from the centre sample.
    pub fn weight(&self, offset: isize) -> f64 {
        let index = offset + self.radius as isize;
        if index < 0 {
            return 0.0;
        }
        self.weights.get(index as usize).copied().unwrap_or(0.0)
    }

    /// Weighted mean around `index`, renormalized over the samples that exist.
    pub fn smooth_at(&self, values: &[[f64; MotionParams::LEN]], index: usize) -> [f64; MotionParams::LEN] {
        if values.is_empty() {
            return MotionParams::IDENTITY.to_array();
        }
        let index = index.min(values.len() - 1);
        let lo = index.saturating_sub(self.radius);
        let hi = (index + self.radius).min(values.len() - 1);

        let mut acc = [0.0; MotionParams::LEN];
        let mut total = 0.0;
        for (j, value) in values.iter().enumerate().take(hi + 1).skip(lo) {
            let w = self.weights[j + self.radius - index];
            total += w;
            for (a, v) in acc.iter_mut().zip(value) {
                *a += w * v;
            }
        }
        if total > 0.0 {
            acc.iter_mut().for_each(|a| *a /= total);
        }
        acc
    }

    /// Smooth a whole sequence in parallel.
    pub fn smooth_sequence(&self, values: &[[f64; MotionParams::LEN]]) -> Vec<[f64; MotionParams::LEN]> {
        (0..values.len())
            .into_par_iter()
            .map(|i| self.smooth_at(values, i))
            .collect()
    }
}

/// Convert smoothed parameters back into a transform, falling back to `original`.
pub(crate) fn recompose(values: [f64; MotionParams::LEN], original: Transform2D) -> Transform2D {
    Transform2D::from_params(&MotionParams::from_array(values)).unwrap_or(original)
}

/// Non-causal smoother; outputs within `window_size` of the newest sample
/// are revised as later samples arrive.
#[derive(Debug, Clone, Default)]
pub struct GaussianSmoother {
    kernel: Option<GaussianKernel>,
    window_size: usize,
    strength: f64,
    params: Vec<[f64; MotionParams::LEN]>,
    history: SmootherHistory,
}

impl GaussianSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kernel(&self) -> Option<&GaussianKernel> {
        self.kernel.as_ref()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    /// Smooth every stored sample from scratch.
    pub fn resmooth_all(&mut self) {
        let Some(kernel) = &self.kernel else { return };
        let smoothed = kernel.smooth_sequence(&self.params);
        for (i, values) in smoothed.into_iter().enumerate() {
            let value = recompose(values, self.history.original(i));
            self.history.set_smoothed(i, value);
        }
    }
}

impl MotionSmoother for GaussianSmoother {
    fn kind(&self) -> SmootherKind {
        SmootherKind::Gaussian
    }

    fn initialize(&mut self, window_size: usize, strength: f64) {
        self.window_size = window_size;
        self.strength = clamp_strength(strength);
        self.kernel = Some(GaussianKernel::new(self.window_size, self.strength));
        self.params.clear();
        self.history.clear();
    }

    fn add_transform(&mut self, transform: Transform2D, timestamp_ms: i64) -> Transform2D {
        self.params.push(transform.params().to_array());
        let newest = self.history.push(transform, transform, timestamp_ms);

        let Some(kernel) = &self.kernel else {
            return transform;
        };
        // Only the trailing window can see the new sample.
        for i in newest.saturating_sub(kernel.radius())..=newest {
            let value = recompose(kernel.smooth_at(&self.params, i), self.history.original(i));
            self.history.set_smoothed(i, value);
        }
        self.history.smoothed(newest)
    }

    fn history(&self) -> &SmootherHistory {
        &self.history
    }

    fn reset(&mut self) {
        self.params.clear();
        self.history.clear();
    }

    fn release(&mut self) {
        *self = Self::default();
    }

    fn is_causal(&self) -> bool {
        false
    }
}
