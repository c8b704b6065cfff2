//! JSON report handed to the renderer.

use std::path::Path;

use serde::{Deserialize, Serialize};
use vstab_models::{AlgorithmKind, BorderPolicy, ProcessingMode, SmootherKind, StabilizationConfig, Transform2D};

use crate::error::WorkerResult;

/// Per-frame stabilization result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilizedFrame {
    pub frame_index: u64,
    pub timestamp_ms: i64,
    /// Cumulative estimated camera motion
    pub original: Transform2D,
    /// Output of the smoother
    pub smoothed: Transform2D,
    /// Final pose after boundary optimization (the smoothed pose in realtime)
    pub optimized: Transform2D,
    /// Warp to apply to the frame: `optimized · original⁻¹`
    pub correction: Transform2D,
}

impl StabilizedFrame {
    pub fn new(frame_index: u64, timestamp_ms: i64, original: Transform2D, smoothed: Transform2D, optimized: Transform2D) -> Self {
        let correction = Transform2D::from_matrix(optimized.matrix() * original.inverse().matrix()).unwrap_or_default();
        Self {
            frame_index,
            timestamp_ms,
            original,
            smoothed,
            optimized,
            correction,
        }
    }
}

/// Whole-session report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizationReport {
    pub session_id: String,
    pub algorithm: AlgorithmKind,
    pub smoother: SmootherKind,
    pub mode: ProcessingMode,
    /// Forwarded untouched to the renderer
    pub border_policy: BorderPolicy,
    pub width: u32,
    pub height: u32,
    pub frames: Vec<StabilizedFrame>,
    /// Smoothed bounds minus original bounds, offline only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary_diff: Option<[f64; 4]>,
    /// Frames over the realtime budget, realtime only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_misses: Option<u64>,
}

impl StabilizationReport {
    pub fn new(session_id: &str, config: &StabilizationConfig, dimensions: (u32, u32)) -> Self {
        Self {
            session_id: session_id.to_string(),
            algorithm: config.algorithm,
            smoother: config.smoother,
            mode: config.mode,
            border_policy: config.border_policy,
            width: dimensions.0,
            height: dimensions.1,
            frames: Vec::new(),
            boundary_diff: None,
            deadline_misses: None,
        }
    }

    pub fn to_json(&self, pretty: bool) -> WorkerResult<String> {
        Ok(if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        })
    }

    pub fn write_json(&self, path: &Path, pretty: bool) -> WorkerResult<()> {
        std::fs::write(path, self.to_json(pretty)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction_maps_original_to_optimized() {
        let original = Transform2D::from_translation(10.0, -4.0);
        let optimized = Transform2D::from_translation(7.0, -1.0);
        let frame = StabilizedFrame::new(3, 100, original, optimized, optimized);

        assert!(frame.correction.approx_eq(&Transform2D::from_translation(-3.0, 3.0), 1e-9));
        assert!(frame.correction.accumulate(&original).approx_eq(&optimized, 1e-9));
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = StabilizationReport::new("s-1", &StabilizationConfig::default(), (64, 48));
        report.frames.push(StabilizedFrame::new(
            0,
            0,
            Transform2D::identity(),
            Transform2D::identity(),
            Transform2D::identity(),
        ));

        let value: serde_json::Value = serde_json::from_str(&report.to_json(false).unwrap()).unwrap();
        assert_eq!(value["border_policy"], "crop");
        assert_eq!(value["algorithm"], "optical_flow");
        assert_eq!(value["frames"].as_array().unwrap().len(), 1);
        assert!(value.get("deadline_misses").is_none());

        let back: StabilizationReport = serde_json::from_str(&report.to_json(true).unwrap()).unwrap();
        assert_eq!(back, report);
    }
}
