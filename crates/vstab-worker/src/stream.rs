//! Realtime stabilization under a per-frame deadline.
//!
//! Each frame is estimated and smoothed causally, and its result is emitted
//! before the next frame is accepted. There is no trajectory-wide boundary
//! optimization in this mode.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use vstab_models::{ProcessingMode, StabilizationConfig};
use vstab_motion::metrics::record_frame_duration;
use vstab_motion::smoother::create_smoother_with;
use vstab_motion::{
    create_estimator, AdaptiveTuning, EstimatorTuning, ImuSample, MotionEstimator, MotionSmoother, VideoFrame, VisionContext,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::SessionLogger;
use crate::output::{StabilizationReport, StabilizedFrame};
use crate::source::FrameSource;

/// Counters for one streaming session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames: u64,
    pub deadline_misses: u64,
}

pub struct StreamingStabilizer {
    config: StabilizationConfig,
    estimator: Box<dyn MotionEstimator>,
    smoother: Box<dyn MotionSmoother>,
    previous: Option<VideoFrame>,
    frame_budget: Duration,
    summary: StreamSummary,
    logger: SessionLogger,
}

impl StreamingStabilizer {
    /// Build the estimator and causal smoother for frames of `dimensions`.
    pub fn new(
        config: &StabilizationConfig,
        worker: &WorkerConfig,
        context: &VisionContext,
        dimensions: (u32, u32),
    ) -> WorkerResult<Self> {
        if worker.target_fps.is_nan() || worker.target_fps <= 0.0 {
            return Err(WorkerError::config_error(format!("invalid target fps: {}", worker.target_fps)));
        }
        let config = StabilizationConfig {
            mode: ProcessingMode::Realtime,
            ..config.clone()
        }
        .clamped();

        let mut estimator = create_estimator(config.algorithm, context, EstimatorTuning::default())?;
        estimator.initialize(dimensions.0, dimensions.1)?;
        let smoother = create_smoother_with(
            config.smoother,
            config.window_size,
            config.strength,
            config.mode,
            AdaptiveTuning::for_frame(dimensions.0, dimensions.1),
        );

        Ok(Self {
            config,
            estimator,
            smoother,
            previous: None,
            frame_budget: Duration::from_secs_f64(1.0 / worker.target_fps),
            summary: StreamSummary::default(),
            logger: SessionLogger::new("stream_stabilization"),
        })
    }

    pub fn with_logger(mut self, logger: SessionLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &StabilizationConfig {
        &self.config
    }

    pub fn frame_budget(&self) -> Duration {
        self.frame_budget
    }

    pub fn summary(&self) -> StreamSummary {
        self.summary
    }

    pub fn session_id(&self) -> &str {
        self.logger.session_id()
    }

    pub fn push_sensor_sample(&mut self, sample: ImuSample) {
        self.estimator.push_sensor_sample(sample);
    }

    /// Estimate and smooth one frame.
    pub fn process_frame(&mut self, frame: VideoFrame) -> StabilizedFrame {
        let started = Instant::now();

        let original = match &self.previous {
            Some(prev) => self.estimator.estimate_motion(prev, &frame),
            None => self.estimator.previous_transform(),
        };
        let smoothed = self.smoother.add_transform(original, frame.timestamp_ms);
        let result = StabilizedFrame::new(frame.index, frame.timestamp_ms, original, smoothed, smoothed);
        self.previous = Some(frame);

        let elapsed = started.elapsed();
        let missed = elapsed > self.frame_budget;
        self.summary.frames += 1;
        if missed {
            self.summary.deadline_misses += 1;
            warn!(
                session_id = %self.logger.session_id(),
                frame_index = result.frame_index,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.frame_budget.as_secs_f64() * 1000.0,
                "Frame missed its deadline"
            );
        }
        record_frame_duration(elapsed.as_secs_f64(), missed);
        result
    }

    /// Drop the reference frame and smoother state, keeping the configuration.
    pub fn reset(&mut self) {
        self.estimator.reset();
        self.smoother.reset();
        self.previous = None;
    }

    /// Process every frame of `source`, sending each result on `output`.
    ///
    /// Stops early without error if the receiver is dropped.
    pub async fn run<S>(
        mut self,
        mut source: S,
        cancel: watch::Receiver<bool>,
        output: mpsc::Sender<StabilizedFrame>,
    ) -> WorkerResult<StreamSummary>
    where
        S: FrameSource + 'static,
    {
        self.logger.log_start(&format!(
            "{} estimator, {} smoother, budget {:?}",
            self.config.algorithm,
            self.smoother.kind(),
            self.frame_budget
        ));
        let span = self.logger.create_span();
        let logger = self.logger.clone();

        let result = tokio::task::spawn_blocking(move || -> WorkerResult<StreamSummary> {
            let _guard = span.enter();
            while let Some(frame) = source.next_frame()? {
                if *cancel.borrow() {
                    return Err(WorkerError::Cancelled);
                }
                for sample in source.take_sensor_samples(frame.timestamp_ms) {
                    self.push_sensor_sample(sample);
                }
                let result = self.process_frame(frame);
                if output.blocking_send(result).is_err() {
                    debug!("Stream receiver dropped");
                    break;
                }
            }
            self.estimator.release();
            self.smoother.release();
            self.logger.log_completion(&format!(
                "{} frames, {} deadline misses",
                self.summary.frames, self.summary.deadline_misses
            ));
            Ok(self.summary)
        })
        .await
        .map_err(WorkerError::from)
        .and_then(|summary| summary);

        if let Err(e) = &result {
            logger.log_failure(e);
        }
        result
    }

    /// Run `source` to completion and collect a report.
    pub async fn run_to_report<S>(self, source: S, cancel: watch::Receiver<bool>) -> WorkerResult<StabilizationReport>
    where
        S: FrameSource + 'static,
    {
        let mut report = StabilizationReport::new(self.logger.session_id(), &self.config, source.dimensions());
        let (tx, mut rx) = mpsc::channel(64);
        let runner = tokio::spawn(self.run(source, cancel, tx));

        while let Some(frame) = rx.recv().await {
            report.frames.push(frame);
        }
        let summary = runner.await??;
        report.deadline_misses = Some(summary.deadline_misses);
        Ok(report)
    }
}
