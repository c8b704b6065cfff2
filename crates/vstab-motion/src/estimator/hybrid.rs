//! Vision and gyroscope fusion.
//!
//! Both inner estimators run on every frame. Their inter-frame deltas are
//! blended parameter-wise with `hybrid_vision_weight` on the vision side;
//! when the sensor has no data for a frame the vision delta is used alone.

use vstab_models::{AlgorithmKind, Transform2D};

use super::{
    EstimatorTuning, ImuSample, MotionEstimator, OpticalFlowMotionEstimator, SensorMotionEstimator,
    TrackingState,
};
use crate::context::VisionContext;
use crate::error::MotionResult;
use crate::metrics;
use crate::vision::VideoFrame;

pub struct HybridMotionEstimator {
    vision: OpticalFlowMotionEstimator,
    sensor: SensorMotionEstimator,
    vision_weight: f64,
    previous: Transform2D,
    initialized: bool,
}

impl HybridMotionEstimator {
    pub fn new(context: &VisionContext, tuning: EstimatorTuning) -> MotionResult<Self> {
        let vision_weight = tuning.hybrid_vision_weight.clamp(0.0, 1.0);
        Ok(Self {
            vision: OpticalFlowMotionEstimator::with_kind(context, tuning.clone(), AlgorithmKind::Hybrid)?,
            sensor: SensorMotionEstimator::new(tuning),
            vision_weight,
            previous: Transform2D::identity(),
            initialized: false,
        })
    }

    pub fn vision_weight(&self) -> f64 {
        self.vision_weight
    }

    /// Inter-frame step between two cumulative transforms.
    fn step(before: &Transform2D, after: &Transform2D) -> Transform2D {
        before.inverse().accumulate(after)
    }
}

impl MotionEstimator for HybridMotionEstimator {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Hybrid
    }

    fn initialize(&mut self, width: u32, height: u32) -> MotionResult<()> {
        self.vision.initialize(width, height)?;
        self.sensor.initialize(width, height)?;
        self.previous = Transform2D::identity();
        self.initialized = true;
        Ok(())
    }

    fn estimate_motion(&mut self, prev: &VideoFrame, curr: &VideoFrame) -> Transform2D {
        if !self.initialized {
            metrics::record_degraded(AlgorithmKind::Hybrid.as_str(), metrics::DegradeReason::NotInitialized);
            return self.previous;
        }

        let vision_before = self.vision.previous_transform();
        let vision_after = self.vision.estimate_motion(prev, curr);
        let sensor_before = self.sensor.previous_transform();
        let sensor_after = self.sensor.estimate_motion(prev, curr);

        let vision_step = Self::step(&vision_before, &vision_after);
        let delta = if self.sensor.last_degraded() {
            vision_step
        } else {
            let sensor_step = Self::step(&sensor_before, &sensor_after);
            vision_step.weighted_average(&sensor_step, self.vision_weight)
        };

        self.previous = self.previous.accumulate(&delta);
        self.previous
    }

    fn reset(&mut self) {
        self.vision.reset();
        self.sensor.reset();
        self.previous = Transform2D::identity();
    }

    fn release(&mut self) {
        self.vision.release();
        self.sensor.release();
        self.previous = Transform2D::identity();
        self.initialized = false;
    }

    fn state(&self) -> TrackingState {
        if !self.initialized {
            return TrackingState::Uninitialized;
        }
        // Usable as long as either source is tracking.
        match (self.vision.state(), self.sensor.state()) {
            (TrackingState::Tracking, _) | (_, TrackingState::Tracking) => TrackingState::Tracking,
            (vision, _) => vision,
        }
    }

    fn previous_transform(&self) -> Transform2D {
        self.previous
    }

    fn push_sensor_sample(&mut self, sample: ImuSample) {
        self.sensor.push_sensor_sample(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::corners::tests::textured_image;
    use approx::assert_relative_eq;

    fn frame(offset: (i32, i32), index: u64, ts: i64) -> VideoFrame {
        VideoFrame::new(textured_image(160, 120, offset), index, ts)
    }

    fn estimator() -> HybridMotionEstimator {
        let mut estimator = HybridMotionEstimator::new(&VisionContext::native(), EstimatorTuning::default()).unwrap();
        estimator.initialize(160, 120).unwrap();
        estimator
    }

    #[test]
    fn test_without_sensor_data_follows_vision() {
        let mut estimator = estimator();
        let (tx, _) = estimator
            .estimate_motion(&frame((0, 0), 0, 0), &frame((3, 0), 1, 33))
            .translation();
        assert!((tx - 3.0).abs() < 0.5, "tx {tx}");
        assert_eq!(estimator.state(), TrackingState::Tracking);
    }

    #[test]
    fn test_blends_rotation_with_sensor() {
        let mut estimator = estimator();
        estimator.push_sensor_sample(ImuSample::new(0, [0.0, 0.0, 1.0]));
        estimator.push_sensor_sample(ImuSample::new(100, [0.0, 0.0, 1.0]));

        // Vision sees no motion, the gyro sees 0.1 rad of roll.
        let t = estimator.estimate_motion(&frame((0, 0), 0, 0), &frame((0, 0), 1, 100));
        let expected = 0.3 * 0.1_f64.to_degrees();
        assert_relative_eq!(t.params().rotation_deg, expected, epsilon = 0.05);
    }

    #[test]
    fn test_uninitialized_is_identity() {
        let mut estimator = HybridMotionEstimator::new(&VisionContext::native(), EstimatorTuning::default()).unwrap();
        let f = frame((0, 0), 0, 0);
        assert!(estimator.estimate_motion(&f, &f).is_identity(0.0));
        assert_eq!(estimator.state(), TrackingState::Uninitialized);
    }
}
