//! Offline stabilization of a whole clip.
//!
//! A blocking producer decodes frames and estimates motion, sending one
//! [`MotionSample`] per frame through a bounded queue. The consumer feeds
//! the samples to a [`TrajectoryOptimizer`], which runs on a blocking
//! thread once the source is drained. Cancellation is checked between
//! frames and during optimization; a cancelled run publishes nothing.

use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, Instrument};
use vstab_models::{MotionSample, StabilizationConfig};
use vstab_motion::{create_estimator, EstimatorTuning, OptimizerConfig, TrajectoryOptimizer, VisionContext};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::SessionLogger;
use crate::output::{StabilizationReport, StabilizedFrame};
use crate::source::FrameSource;

pub struct BatchStabilizer {
    config: StabilizationConfig,
    worker: WorkerConfig,
    context: VisionContext,
    tuning: EstimatorTuning,
    logger: SessionLogger,
}

impl BatchStabilizer {
    pub fn new(config: &StabilizationConfig, worker: WorkerConfig, context: VisionContext) -> Self {
        Self {
            config: config.clamped(),
            worker,
            context,
            tuning: EstimatorTuning::default(),
            logger: SessionLogger::new("batch_stabilization"),
        }
    }

    pub fn with_tuning(mut self, tuning: EstimatorTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_logger(mut self, logger: SessionLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn session_id(&self) -> &str {
        self.logger.session_id()
    }

    /// Stabilize every frame of `source`.
    pub async fn run<S>(&self, source: S, cancel: watch::Receiver<bool>) -> WorkerResult<StabilizationReport>
    where
        S: FrameSource + 'static,
    {
        let result = self.run_session(source, cancel).await;
        if let Err(e) = &result {
            self.logger.log_failure(e);
        }
        result
    }

    async fn run_session<S>(&self, mut source: S, cancel: watch::Receiver<bool>) -> WorkerResult<StabilizationReport>
    where
        S: FrameSource + 'static,
    {
        let started = Instant::now();
        let dimensions = source.dimensions();
        self.logger.log_start(&format!(
            "{} frames, {} estimator, {} smoother",
            source.len_hint().map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            self.config.algorithm,
            self.config.smoother
        ));

        let mut estimator = create_estimator(self.config.algorithm, &self.context, self.tuning.clone())?;
        estimator.initialize(dimensions.0, dimensions.1)?;

        let (tx, mut rx) = mpsc::channel::<MotionSample>(self.worker.queue_capacity);
        let producer_cancel = cancel.clone();
        let span = self.logger.create_span();
        let producer = tokio::task::spawn_blocking(move || -> WorkerResult<()> {
            let _guard = span.enter();
            let mut previous = None;
            while let Some(frame) = source.next_frame()? {
                if *producer_cancel.borrow() {
                    return Err(WorkerError::Cancelled);
                }
                for sample in source.take_sensor_samples(frame.timestamp_ms) {
                    estimator.push_sensor_sample(sample);
                }

                let transform = match &previous {
                    Some(prev) => estimator.estimate_motion(prev, &frame),
                    None => estimator.previous_transform(),
                };
                let sample = MotionSample::new(transform, frame.index, frame.timestamp_ms);
                if tx.blocking_send(sample).is_err() {
                    // Consumer stopped; it reports why.
                    return Ok(());
                }
                previous = Some(frame);
            }
            estimator.release();
            Ok(())
        });

        let mut optimizer = TrajectoryOptimizer::with_config(
            OptimizerConfig::from_stabilization(&self.config).with_frame_size(dimensions.0, dimensions.1),
        );
        let mut samples = Vec::new();
        while let Some(sample) = rx.recv().await {
            if *cancel.borrow() {
                break;
            }
            optimizer.add_transform_at(sample.transform, sample.timestamp_ms);
            samples.push(sample);
        }
        drop(rx);
        producer.await??;

        if *cancel.borrow() {
            debug!(frames = samples.len(), "Cancelled before optimization");
            return Err(WorkerError::Cancelled);
        }
        debug!(frames = samples.len(), "Motion estimation finished");

        let optimize_cancel = cancel.clone();
        let optimizer = tokio::task::spawn_blocking(move || -> WorkerResult<TrajectoryOptimizer> {
            optimizer.optimize_trajectory_with_cancel(|| *optimize_cancel.borrow())?;
            Ok(optimizer)
        })
        .instrument(self.logger.create_span())
        .await??;

        let mut report = StabilizationReport::new(self.logger.session_id(), &self.config, dimensions);
        report.frames = samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                StabilizedFrame::new(
                    sample.frame_index,
                    sample.timestamp_ms,
                    optimizer.original_transform(i),
                    optimizer.smooth_transform(i),
                    optimizer.optimized_transform(i),
                )
            })
            .collect();
        report.boundary_diff = optimizer.boundary_diff();

        info!(
            session_id = %self.logger.session_id(),
            frames = report.frames.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch stabilization finished"
        );
        self.logger.log_completion(&format!("{} frames", report.frames.len()));
        Ok(report)
    }
}
