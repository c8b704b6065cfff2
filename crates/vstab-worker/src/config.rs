//! Worker configuration.

use std::path::Path;

use config::{Config, Environment, File};
use tracing::debug;
use vstab_models::StabilizationConfig;

use crate::error::WorkerResult;

/// Default stabilization settings file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "vstab.toml";

/// Runner settings read from `VSTAB_WORKER_*` variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Capacity of the estimator → optimizer sample queue
    pub queue_capacity: usize,
    /// Frame rate of image sequences, used for timestamps
    pub source_fps: f64,
    /// Realtime frame rate; one frame's budget is `1 / target_fps`
    pub target_fps: f64,
    /// Pretty-print the JSON report
    pub pretty_json: bool,
    /// Install the Prometheus recorder and print a snapshot at exit
    pub metrics_enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            source_fps: 30.0,
            target_fps: 30.0,
            pretty_json: true,
            metrics_enabled: false,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_capacity: std::env::var("VSTAB_WORKER_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.queue_capacity),
            source_fps: std::env::var("VSTAB_WORKER_SOURCE_FPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|fps: &f64| *fps > 0.0)
                .unwrap_or(defaults.source_fps),
            target_fps: std::env::var("VSTAB_WORKER_TARGET_FPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|fps: &f64| *fps > 0.0)
                .unwrap_or(defaults.target_fps),
            pretty_json: std::env::var("VSTAB_WORKER_PRETTY_JSON")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(defaults.pretty_json),
            metrics_enabled: std::env::var("VSTAB_METRICS")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(defaults.metrics_enabled),
        }
    }
}

/// Load stabilization settings from `VSTAB_CONFIG` (or `vstab.toml`) and
/// `VSTAB_*` variables, then clamp them into range.
pub fn load_stabilization_config() -> WorkerResult<StabilizationConfig> {
    let path = std::env::var("VSTAB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    load_stabilization_config_from(Path::new(&path))
}

/// Like [`load_stabilization_config`] with an explicit file. A missing file
/// is not an error; environment variables override file values.
pub fn load_stabilization_config_from(path: &Path) -> WorkerResult<StabilizationConfig> {
    let settings = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(Environment::with_prefix("VSTAB").try_parsing(true))
        .build()?;

    let config: StabilizationConfig = settings.try_deserialize()?;
    let clamped = config.clamped();
    if clamped != config {
        debug!(?config, ?clamped, "Clamped stabilization config");
    }
    Ok(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vstab_models::{AlgorithmKind, BorderPolicy, SmootherKind};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_stabilization_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, StabilizationConfig::default());
    }

    #[test]
    fn test_file_values_are_clamped() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "strength = 1.5\nalgorithm = \"feature\"\nsmoother = \"gaussian\"\nwindow_size = 500\nborder_policy = \"fill\""
        )
        .unwrap();

        let config = load_stabilization_config_from(file.path()).unwrap();
        assert_eq!(config.strength, 1.0);
        assert_eq!(config.algorithm, AlgorithmKind::Feature);
        assert_eq!(config.smoother, SmootherKind::Gaussian);
        assert_eq!(config.window_size, vstab_models::config::MAX_WINDOW_SIZE);
        assert_eq!(config.border_policy, BorderPolicy::Fill);
    }

    #[test]
    fn test_invalid_enum_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "smoother = \"median\"").unwrap();
        assert!(load_stabilization_config_from(file.path()).is_err());
    }

    #[test]
    fn test_worker_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.target_fps, 30.0);
        assert!(!config.metrics_enabled);
    }
}
