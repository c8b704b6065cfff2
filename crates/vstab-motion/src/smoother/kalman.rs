//! Constant-velocity Kalman smoothing of decomposed motion parameters.
//!
//! The state holds the five motion parameters and their per-frame
//! velocities. Strength trades measurement trust for model trust:
//! `Q = 1e-4 * (1 - s) * I`, `R = 1e-1 * s * I`. At strength 0 the filter
//! reproduces its input; at strength 1 it follows a pure constant-velocity
//! path. The first measurement seeds the state with zero velocity, so a
//! path that starts away from identity has no start-up transient.

use nalgebra::{SMatrix, SVector};
use vstab_models::{MotionParams, SmootherKind, Transform2D};

use super::{clamp_strength, MotionSmoother, SmootherHistory};

const PARAMS: usize = MotionParams::LEN;
const STATES: usize = 2 * PARAMS;

type StateVector = SVector<f64, STATES>;
type StateMatrix = SMatrix<f64, STATES, STATES>;
type MeasurementVector = SVector<f64, PARAMS>;
type ObservationMatrix = SMatrix<f64, PARAMS, STATES>;
type MeasurementMatrix = SMatrix<f64, PARAMS, PARAMS>;

const PROCESS_NOISE_SCALE: f64 = 1e-4;
const MEASUREMENT_NOISE_SCALE: f64 = 1e-1;

/// `params` with zero velocities.
fn state_from(params: &MotionParams) -> StateVector {
    let mut x = StateVector::zeros();
    for (i, v) in params.to_array().into_iter().enumerate() {
        x[i] = v;
    }
    x
}

/// Linear Kalman filter over `[params, velocities]`.
#[derive(Debug, Clone)]
pub struct ConstantVelocityFilter {
    x: StateVector,
    p: StateMatrix,
    f: StateMatrix,
    h: ObservationMatrix,
    q: StateMatrix,
    r: MeasurementMatrix,
    strength: f64,
    seeded: bool,
}

impl ConstantVelocityFilter {
    /// Unseeded filter; the first [`ConstantVelocityFilter::step`] seeds it.
    pub fn new(strength: f64) -> Self {
        let mut f = StateMatrix::identity();
        for i in 0..PARAMS {
            f[(i, PARAMS + i)] = 1.0;
        }
        let mut h = ObservationMatrix::zeros();
        for i in 0..PARAMS {
            h[(i, i)] = 1.0;
        }

        let mut filter = Self {
            x: state_from(&MotionParams::IDENTITY),
            p: StateMatrix::identity(),
            f,
            h,
            q: StateMatrix::zeros(),
            r: MeasurementMatrix::zeros(),
            strength: 0.0,
            seeded: false,
        };
        filter.set_strength(strength);
        filter
    }

    /// Rebuild the noise covariances for `strength`, keeping the state.
    pub fn set_strength(&mut self, strength: f64) {
        let s = clamp_strength(strength);
        self.strength = s;
        self.q = StateMatrix::identity() * (PROCESS_NOISE_SCALE * (1.0 - s));
        self.r = MeasurementMatrix::identity() * (MEASUREMENT_NOISE_SCALE * s);
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Restart from `params` with zero velocity and unit covariance.
    pub fn seed(&mut self, params: &MotionParams) {
        self.x = state_from(params);
        self.p = StateMatrix::identity();
        self.seeded = true;
    }

    pub fn predict(&mut self) {
        self.x = self.f * self.x;
        self.p = self.f * self.p * self.f.transpose() + self.q;
    }

    /// Fold in one measurement. Skipped if the innovation covariance is singular.
    pub fn correct(&mut self, params: &MotionParams) {
        let z = MeasurementVector::from_column_slice(&params.to_array());
        let s = self.h * self.p * self.h.transpose() + self.r;
        let Some(s_inv) = s.try_inverse() else {
            return;
        };
        let k = self.p * self.h.transpose() * s_inv;
        let innovation = z - self.h * self.x;
        self.x += k * innovation;
        self.p = (StateMatrix::identity() - k * self.h) * self.p;
    }

    /// Predict, correct, and return the filtered parameters. An unseeded
    /// filter is seeded from `params` and returns them unchanged.
    pub fn step(&mut self, params: &MotionParams) -> MotionParams {
        if !self.seeded {
            self.seed(params);
            return self.position();
        }
        self.predict();
        self.correct(params);
        self.position()
    }

    pub fn position(&self) -> MotionParams {
        MotionParams::new(self.x[0], self.x[1], self.x[2], self.x[3], self.x[4])
    }

    pub fn velocity(&self) -> MotionParams {
        MotionParams::new(self.x[5], self.x[6], self.x[7], self.x[8], self.x[9])
    }
}

/// Causal smoother backed by a [`ConstantVelocityFilter`].
#[derive(Debug, Clone, Default)]
pub struct KalmanSmoother {
    filter: Option<ConstantVelocityFilter>,
    window_size: usize,
    strength: f64,
    history: SmootherHistory,
}

impl KalmanSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn filter(&self) -> Option<&ConstantVelocityFilter> {
        self.filter.as_ref()
    }
}

impl MotionSmoother for KalmanSmoother {
    fn kind(&self) -> SmootherKind {
        SmootherKind::Kalman
    }

    fn initialize(&mut self, window_size: usize, strength: f64) {
        // The window is unused by the filter; kept for reporting.
        self.window_size = window_size;
        self.strength = clamp_strength(strength);
        self.filter = Some(ConstantVelocityFilter::new(self.strength));
        self.history.clear();
    }

    fn add_transform(&mut self, transform: Transform2D, timestamp_ms: i64) -> Transform2D {
        let filter = self
            .filter
            .get_or_insert_with(|| ConstantVelocityFilter::new(self.strength));
        let filtered = filter.step(&transform.params());
        let smoothed = Transform2D::from_params(&filtered).unwrap_or(transform);
        self.history.push(transform, smoothed, timestamp_ms);
        smoothed
    }

    fn history(&self) -> &SmootherHistory {
        &self.history
    }

    fn reset(&mut self) {
        self.filter = Some(ConstantVelocityFilter::new(self.strength));
        self.history.clear();
    }

    fn release(&mut self) {
        *self = Self::default();
    }

    fn is_causal(&self) -> bool {
        true
    }
}
