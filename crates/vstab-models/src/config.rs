//! Stabilization configuration and strategy selectors.
//!
//! Every value entering the pipeline goes through
//! [`StabilizationConfig::clamped`]: out-of-range numbers are pulled back
//! into range instead of being rejected.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest accepted smoothing window (frames on each side).
pub const MAX_WINDOW_SIZE: usize = 120;

/// Error returned when a selector string is not recognised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ConfigParseError {
    kind: &'static str,
    value: String,
}

impl ConfigParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Motion estimation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Keypoint detection + descriptor matching.
    Feature,
    /// Corner tracking with pyramidal Lucas-Kanade.
    #[default]
    OpticalFlow,
    /// Gyroscope integration.
    Sensor,
    /// Vision estimate blended with the sensor estimate.
    Hybrid,
}

impl AlgorithmKind {
    pub const ALL: &'static [AlgorithmKind] = &[
        AlgorithmKind::Feature,
        AlgorithmKind::OpticalFlow,
        AlgorithmKind::Sensor,
        AlgorithmKind::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::Feature => "feature",
            AlgorithmKind::OpticalFlow => "optical_flow",
            AlgorithmKind::Sensor => "sensor",
            AlgorithmKind::Hybrid => "hybrid",
        }
    }

    /// Returns true if this strategy reads pixel data.
    pub fn uses_vision(&self) -> bool {
        !matches!(self, AlgorithmKind::Sensor)
    }

    /// Returns true if this strategy consumes IMU samples.
    pub fn uses_sensor(&self) -> bool {
        matches!(self, AlgorithmKind::Sensor | AlgorithmKind::Hybrid)
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = ConfigParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "feature" | "features" => Ok(AlgorithmKind::Feature),
            "optical_flow" | "opticalflow" | "flow" => Ok(AlgorithmKind::OpticalFlow),
            "sensor" | "gyro" => Ok(AlgorithmKind::Sensor),
            "hybrid" => Ok(AlgorithmKind::Hybrid),
            _ => Err(ConfigParseError::new("algorithm", s)),
        }
    }
}

/// Trajectory smoothing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SmootherKind {
    /// Recursive constant-velocity filter. Causal.
    #[default]
    Kalman,
    /// Symmetric Gaussian window. Needs future samples.
    Gaussian,
    /// Switches between Gaussian and Kalman based on motion intensity.
    Adaptive,
}

impl SmootherKind {
    pub const ALL: &'static [SmootherKind] = &[
        SmootherKind::Kalman,
        SmootherKind::Gaussian,
        SmootherKind::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SmootherKind::Kalman => "kalman",
            SmootherKind::Gaussian => "gaussian",
            SmootherKind::Adaptive => "adaptive",
        }
    }

    /// Returns true if the smoother only ever looks at past samples.
    pub fn is_causal(&self) -> bool {
        matches!(self, SmootherKind::Kalman)
    }
}

impl fmt::Display for SmootherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SmootherKind {
    type Err = ConfigParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kalman" => Ok(SmootherKind::Kalman),
            "gaussian" | "gauss" => Ok(SmootherKind::Gaussian),
            "adaptive" => Ok(SmootherKind::Adaptive),
            _ => Err(ConfigParseError::new("smoother", s)),
        }
    }
}

/// Whether the full sequence is available before smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Whole clip is estimated first, then optimized in one batch.
    #[default]
    Offline,
    /// Each frame is emitted before the next one arrives.
    Realtime,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Offline => "offline",
            ProcessingMode::Realtime => "realtime",
        }
    }

    pub fn is_realtime(&self) -> bool {
        matches!(self, ProcessingMode::Realtime)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = ConfigParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "offline" | "batch" => Ok(ProcessingMode::Offline),
            "realtime" | "real_time" | "streaming" => Ok(ProcessingMode::Realtime),
            _ => Err(ConfigParseError::new("processing mode", s)),
        }
    }
}

/// How the renderer fills the border exposed by a corrective warp.
///
/// Passed through to the renderer untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BorderPolicy {
    /// Scale up and crop so no border is visible
    #[default]
    Crop,
    /// Fill the exposed border with a constant color
    Fill,
    /// Stretch edge pixels into the border
    Deform,
}

impl BorderPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorderPolicy::Crop => "crop",
            BorderPolicy::Fill => "fill",
            BorderPolicy::Deform => "deform",
        }
    }
}

impl fmt::Display for BorderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BorderPolicy {
    type Err = ConfigParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crop" => Ok(BorderPolicy::Crop),
            "fill" => Ok(BorderPolicy::Fill),
            "deform" | "stretch" => Ok(BorderPolicy::Deform),
            _ => Err(ConfigParseError::new("border policy", s)),
        }
    }
}

/// Top-level stabilization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StabilizationConfig {
    /// Smoothing strength in [0, 1] (default: 0.7)
    pub strength: f64,

    /// Motion estimation strategy (default: optical_flow)
    pub algorithm: AlgorithmKind,

    /// Smoothing strategy (default: adaptive)
    pub smoother: SmootherKind,

    /// Smoothing window, frames on each side (default: 30)
    pub window_size: usize,

    /// Pull of the optimized path back into the original bounds, in [0, 1] (default: 0.8)
    pub boundary_constraint: f64,

    /// Border handling forwarded to the renderer (default: crop)
    pub border_policy: BorderPolicy,

    /// Offline batch or realtime streaming (default: offline)
    pub mode: ProcessingMode,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            strength: 0.7,
            algorithm: AlgorithmKind::default(),
            smoother: SmootherKind::Adaptive,
            window_size: 30,
            boundary_constraint: 0.8,
            border_policy: BorderPolicy::default(),
            mode: ProcessingMode::default(),
        }
    }
}

impl StabilizationConfig {
    /// Pull every value into its accepted range.
    ///
    /// A Gaussian smoother cannot run in realtime mode, so it is replaced
    /// by Kalman there.
    pub fn clamped(&self) -> Self {
        let defaults = Self::default();
        let smoother = if self.mode.is_realtime() && self.smoother == SmootherKind::Gaussian {
            SmootherKind::Kalman
        } else {
            self.smoother
        };

        Self {
            strength: clamp_unit(self.strength, defaults.strength),
            algorithm: self.algorithm,
            smoother,
            window_size: self.window_size.clamp(1, MAX_WINDOW_SIZE),
            boundary_constraint: clamp_unit(self.boundary_constraint, defaults.boundary_constraint),
            border_policy: self.border_policy,
            mode: self.mode,
        }
    }
}

fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("feature".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::Feature);
        assert_eq!("OpticalFlow".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::OpticalFlow);
        assert_eq!("hybrid".parse::<AlgorithmKind>().unwrap(), AlgorithmKind::Hybrid);
        assert!("sift".parse::<AlgorithmKind>().is_err());
    }

    #[test]
    fn test_smoother_parse_and_display() {
        for kind in SmootherKind::ALL {
            assert_eq!(kind.to_string().parse::<SmootherKind>().unwrap(), *kind);
        }
        let err = "median".parse::<SmootherKind>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown smoother: median");
    }

    #[test]
    fn test_clamped_pulls_values_into_range() {
        let config = StabilizationConfig {
            strength: 1.7,
            window_size: 0,
            boundary_constraint: -0.3,
            ..Default::default()
        }
        .clamped();

        assert_eq!(config.strength, 1.0);
        assert_eq!(config.window_size, 1);
        assert_eq!(config.boundary_constraint, 0.0);

        let nan = StabilizationConfig {
            strength: f64::NAN,
            window_size: 10_000,
            ..Default::default()
        }
        .clamped();
        assert_eq!(nan.strength, 0.7);
        assert_eq!(nan.window_size, MAX_WINDOW_SIZE);
    }

    #[test]
    fn test_realtime_replaces_gaussian() {
        let config = StabilizationConfig {
            smoother: SmootherKind::Gaussian,
            mode: ProcessingMode::Realtime,
            ..Default::default()
        }
        .clamped();
        assert_eq!(config.smoother, SmootherKind::Kalman);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StabilizationConfig =
            serde_json::from_str(r#"{"smoother":"gaussian","window_size":12}"#).unwrap();
        assert_eq!(config.smoother, SmootherKind::Gaussian);
        assert_eq!(config.window_size, 12);
        assert_eq!(config.algorithm, AlgorithmKind::OpticalFlow);
    }
}
