//! One stabilization session, dispatched on the processing mode.

use tokio::sync::watch;
use vstab_models::{ProcessingMode, StabilizationConfig};
use vstab_motion::VisionContext;

use crate::batch::BatchStabilizer;
use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::SessionLogger;
use crate::output::StabilizationReport;
use crate::source::FrameSource;
use crate::stream::StreamingStabilizer;

/// Run `source` through the batch or streaming runner per `config.mode`.
pub async fn stabilize<S>(
    source: S,
    config: &StabilizationConfig,
    worker: &WorkerConfig,
    context: &VisionContext,
    cancel: watch::Receiver<bool>,
) -> WorkerResult<StabilizationReport>
where
    S: FrameSource + 'static,
{
    let logger = SessionLogger::new(config.mode.as_str());
    match config.mode {
        ProcessingMode::Offline => {
            BatchStabilizer::new(config, worker.clone(), context.clone())
                .with_logger(logger)
                .run(source, cancel)
                .await
        }
        ProcessingMode::Realtime => {
            StreamingStabilizer::new(config, worker, context, source.dimensions())?
                .with_logger(logger)
                .run_to_report(source, cancel)
                .await
        }
    }
}
