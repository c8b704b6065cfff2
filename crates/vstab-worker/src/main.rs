//! Stabilization worker binary.
//!
//! Usage: `vstab-worker <frames_dir> [output.json]`

use std::path::PathBuf;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{info, warn};

use vstab_motion::VisionContext;
use vstab_worker::{init_tracing, load_stabilization_config, stabilize, ImageSequenceSource, WorkerConfig};

const DEFAULT_OUTPUT: &str = "stabilized.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    let mut args = std::env::args().skip(1);
    let frames_dir = args
        .next()
        .map(PathBuf::from)
        .context("usage: vstab-worker <frames_dir> [output.json]")?;
    let output = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    info!("Starting vstab-worker");

    let worker = WorkerConfig::from_env();
    info!("Worker config: {:?}", worker);

    let metrics = if worker.metrics_enabled {
        Some(PrometheusBuilder::new().install_recorder().context("installing metrics recorder")?)
    } else {
        None
    };

    let config = load_stabilization_config().context("loading stabilization config")?;
    info!(
        algorithm = %config.algorithm,
        smoother = %config.smoother,
        mode = %config.mode,
        strength = config.strength,
        window_size = config.window_size,
        "Stabilization config loaded"
    );

    let source = ImageSequenceSource::open(&frames_dir, worker.source_fps)
        .with_context(|| format!("opening {}", frames_dir.display()))?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling");
            cancel_tx.send(true).ok();
        }
    });

    let context = VisionContext::native();
    let report = stabilize(source, &config, &worker, &context, cancel_rx).await?;
    report.write_json(&output, worker.pretty_json)?;

    info!(
        session_id = %report.session_id,
        frames = report.frames.len(),
        output = %output.display(),
        "Stabilization report written"
    );

    if let Some(handle) = metrics {
        println!("{}", handle.render());
    }
    Ok(())
}
