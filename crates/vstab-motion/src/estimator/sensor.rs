//! Gyroscope-driven motion estimation.
//!
//! Angular rates are integrated with the trapezoid rule over the interval
//! between the two frame timestamps. Roll maps to image rotation; yaw and
//! pitch map to horizontal and vertical shift through a pinhole focal
//! length expressed in pixels.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use vstab_models::{AlgorithmKind, MotionParams, Transform2D};

use super::{EstimatorCore, EstimatorTuning, MotionEstimator, TrackingState};
use crate::error::MotionResult;
use crate::metrics::DegradeReason;
use crate::vision::VideoFrame;

/// Samples kept when frames stop arriving.
const MAX_BUFFERED_SAMPLES: usize = 4096;

/// One inertial measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Capture time in milliseconds, same clock as frame timestamps
    pub timestamp_ms: i64,
    /// Angular rate around x (pitch), y (yaw), z (roll) in rad/s
    pub gyro: [f64; 3],
    /// Linear acceleration in m/s², carried for downstream consumers
    #[serde(default)]
    pub accel: [f64; 3],
}

impl ImuSample {
    pub fn new(timestamp_ms: i64, gyro: [f64; 3]) -> Self {
        Self {
            timestamp_ms,
            gyro,
            accel: [0.0; 3],
        }
    }
}

pub struct SensorMotionEstimator {
    core: EstimatorCore,
    samples: VecDeque<ImuSample>,
    focal_length_px: f64,
    last_degraded: bool,
}

impl SensorMotionEstimator {
    pub fn new(tuning: EstimatorTuning) -> Self {
        Self {
            core: EstimatorCore::new(AlgorithmKind::Sensor, tuning),
            samples: VecDeque::new(),
            focal_length_px: 0.0,
            last_degraded: false,
        }
    }

    /// Whether the last estimate had no usable samples.
    pub fn last_degraded(&self) -> bool {
        self.last_degraded
    }

    pub fn buffered_samples(&self) -> usize {
        self.samples.len()
    }

    /// Integrated rotation in radians over `[from_ms, to_ms]`.
    ///
    /// `None` when fewer than two samples bracket any part of the interval.
    pub fn integrate(&self, from_ms: i64, to_ms: i64) -> Option<[f64; 3]> {
        if to_ms <= from_ms {
            return None;
        }
        let mut angle = [0.0; 3];
        let mut covered = false;

        for (a, b) in self.samples.iter().zip(self.samples.iter().skip(1)) {
            let start = a.timestamp_ms.max(from_ms);
            let end = b.timestamp_ms.min(to_ms);
            if end <= start || b.timestamp_ms <= a.timestamp_ms {
                continue;
            }
            covered = true;
            let span = (b.timestamp_ms - a.timestamp_ms) as f64;
            let rate_at = |t: i64, axis: usize| {
                let w = (t - a.timestamp_ms) as f64 / span;
                a.gyro[axis] * (1.0 - w) + b.gyro[axis] * w
            };
            let dt = (end - start) as f64 / 1000.0;
            for (axis, total) in angle.iter_mut().enumerate() {
                *total += dt * (rate_at(start, axis) + rate_at(end, axis)) / 2.0;
            }
        }
        covered.then_some(angle)
    }

    fn prune(&mut self, before_ms: i64) {
        // Keep one sample at or before the cut so the next interval is bracketed.
        while self.samples.len() >= 2 && self.samples[1].timestamp_ms <= before_ms {
            self.samples.pop_front();
        }
    }
}

impl MotionEstimator for SensorMotionEstimator {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Sensor
    }

    fn initialize(&mut self, width: u32, height: u32) -> MotionResult<()> {
        self.core.initialize(width, height)?;
        self.focal_length_px = width as f64 * self.core.tuning().focal_length_factor;
        self.samples.clear();
        self.last_degraded = false;
        Ok(())
    }

    fn estimate_motion(&mut self, prev: &VideoFrame, curr: &VideoFrame) -> Transform2D {
        if !self.core.begin_frame() {
            return self.core.previous();
        }

        let Some([pitch, yaw, roll]) = self.integrate(prev.timestamp_ms, curr.timestamp_ms) else {
            self.last_degraded = true;
            return self.core.degrade(DegradeReason::NoSensorData);
        };
        self.prune(curr.timestamp_ms);

        let params = MotionParams {
            rotation_deg: roll.to_degrees(),
            translation_x: self.focal_length_px * yaw.tan(),
            translation_y: self.focal_length_px * pitch.tan(),
            ..MotionParams::IDENTITY
        };
        match Transform2D::from_params(&params) {
            Some(delta) => {
                self.last_degraded = false;
                self.core.accept(&delta)
            }
            None => {
                self.last_degraded = true;
                self.core.degrade(DegradeReason::InvalidTransform)
            }
        }
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.last_degraded = false;
        self.core.reset();
    }

    fn release(&mut self) {
        self.samples = VecDeque::new();
        self.focal_length_px = 0.0;
        self.core.release();
    }

    fn state(&self) -> TrackingState {
        self.core.state()
    }

    fn previous_transform(&self) -> Transform2D {
        self.core.previous()
    }

    fn push_sensor_sample(&mut self, sample: ImuSample) {
        if !sample.gyro.iter().all(|v| v.is_finite()) {
            return;
        }
        // Out-of-order samples are inserted in timestamp order.
        let at = self
            .samples
            .iter()
            .rposition(|s| s.timestamp_ms <= sample.timestamp_ms)
            .map_or(0, |i| i + 1);
        self.samples.insert(at, sample);
        if self.samples.len() > MAX_BUFFERED_SAMPLES {
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn estimator() -> SensorMotionEstimator {
        let mut estimator = SensorMotionEstimator::new(EstimatorTuning::default());
        estimator.initialize(640, 480).unwrap();
        estimator
    }

    fn frame(index: u64, ts: i64) -> VideoFrame {
        VideoFrame::blank(4, 4, index, ts)
    }

    #[test]
    fn test_constant_roll_rate_integrates_to_rotation() {
        let mut estimator = estimator();
        for ts in (0..=100).step_by(10) {
            estimator.push_sensor_sample(ImuSample::new(ts, [0.0, 0.0, 0.5]));
        }

        let t = estimator.estimate_motion(&frame(0, 0), &frame(1, 100));
        // 0.5 rad/s over 100 ms
        assert_relative_eq!(t.params().rotation_deg, 0.05_f64.to_degrees(), epsilon = 1e-9);
        assert_eq!(estimator.state(), TrackingState::Tracking);
    }

    #[test]
    fn test_yaw_maps_to_horizontal_shift() {
        let mut estimator = estimator();
        estimator.push_sensor_sample(ImuSample::new(0, [0.0, 0.1, 0.0]));
        estimator.push_sensor_sample(ImuSample::new(50, [0.0, 0.1, 0.0]));

        let (tx, ty) = estimator.estimate_motion(&frame(0, 0), &frame(1, 50)).translation();
        assert_relative_eq!(tx, 640.0 * 0.005_f64.tan(), epsilon = 1e-9);
        assert_eq!(ty, 0.0);
    }

    #[test]
    fn test_linear_rate_uses_trapezoid() {
        let mut estimator = estimator();
        estimator.push_sensor_sample(ImuSample::new(0, [0.0, 0.0, 0.0]));
        estimator.push_sensor_sample(ImuSample::new(1000, [0.0, 0.0, 1.0]));

        // Half of the interval: rate rises 0 -> 0.5 over 0.5 s
        let angle = estimator.integrate(0, 500).unwrap();
        assert_relative_eq!(angle[2], 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_no_samples_is_identity_motion() {
        let mut estimator = estimator();
        let t = estimator.estimate_motion(&frame(0, 0), &frame(1, 33));
        assert!(t.is_identity(0.0));
        assert!(estimator.last_degraded());
        assert_eq!(estimator.state(), TrackingState::Reacquiring);
    }

    #[test]
    fn test_out_of_order_samples_are_sorted() {
        let mut estimator = estimator();
        estimator.push_sensor_sample(ImuSample::new(20, [0.0, 0.0, 1.0]));
        estimator.push_sensor_sample(ImuSample::new(0, [0.0, 0.0, 1.0]));
        estimator.push_sensor_sample(ImuSample::new(10, [0.0, 0.0, 1.0]));
        estimator.push_sensor_sample(ImuSample::new(5, [f64::NAN, 0.0, 0.0]));

        assert_eq!(estimator.buffered_samples(), 3);
        assert_relative_eq!(estimator.integrate(0, 20).unwrap()[2], 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_samples_are_pruned_after_use() {
        let mut estimator = estimator();
        for ts in (0..=200).step_by(10) {
            estimator.push_sensor_sample(ImuSample::new(ts, [0.0, 0.0, 0.1]));
        }
        estimator.estimate_motion(&frame(0, 0), &frame(1, 100));
        assert_eq!(estimator.buffered_samples(), 11);
        let t = estimator.estimate_motion(&frame(1, 100), &frame(2, 200));
        assert_relative_eq!(t.params().rotation_deg, 0.02_f64.to_degrees(), epsilon = 1e-9);
    }
}
