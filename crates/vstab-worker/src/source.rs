//! Frame sources feeding the runners.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vstab_motion::{ImuSample, VideoFrame};

use crate::error::{WorkerError, WorkerResult};

/// File holding gyro samples next to an image sequence.
pub const SENSOR_FILE: &str = "imu.json";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// Supplies consecutive decoded frames.
pub trait FrameSource: Send {
    /// Dimensions shared by every frame.
    fn dimensions(&self) -> (u32, u32);

    /// Next frame, or `None` once the source is drained.
    fn next_frame(&mut self) -> WorkerResult<Option<VideoFrame>>;

    /// Total frame count if known.
    fn len_hint(&self) -> Option<usize> {
        None
    }

    /// Remove and return the inertial samples up to `until_ms`.
    fn take_sensor_samples(&mut self, _until_ms: i64) -> Vec<ImuSample> {
        Vec::new()
    }
}

/// Drain sensor samples from `queue` up to and including `until_ms`.
fn drain_until(queue: &mut VecDeque<ImuSample>, until_ms: i64) -> Vec<ImuSample> {
    let split = queue
        .iter()
        .position(|s| s.timestamp_ms > until_ms)
        .unwrap_or(queue.len());
    queue.drain(..split).collect()
}

fn sorted_samples(mut samples: Vec<ImuSample>) -> VecDeque<ImuSample> {
    samples.sort_by_key(|s| s.timestamp_ms);
    samples.into()
}

/// Image files in a directory, decoded in file-name order.
///
/// Timestamps are derived from the frame index and `fps`. An `imu.json`
/// array of samples in the same directory is picked up automatically.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next: usize,
    fps: f64,
    dimensions: (u32, u32),
    sensor: VecDeque<ImuSample>,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>, fps: f64) -> WorkerResult<Self> {
        let dir = dir.as_ref();
        if fps.is_nan() || fps <= 0.0 {
            return Err(WorkerError::config_error(format!("invalid frame rate: {fps}")));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let first = paths
            .first()
            .ok_or_else(|| WorkerError::source_failed(format!("no images in {}", dir.display())))?;
        let dimensions = image::image_dimensions(first)?;

        let sensor_path = dir.join(SENSOR_FILE);
        let sensor = if sensor_path.is_file() {
            let samples: Vec<ImuSample> = serde_json::from_slice(&std::fs::read(&sensor_path)?)?;
            debug!(samples = samples.len(), "Loaded sensor samples");
            sorted_samples(samples)
        } else {
            VecDeque::new()
        };

        info!(
            dir = %dir.display(),
            frames = paths.len(),
            width = dimensions.0,
            height = dimensions.1,
            "Opened image sequence"
        );

        Ok(Self {
            paths,
            next: 0,
            fps,
            dimensions,
            sensor,
        })
    }

    fn timestamp_ms(&self, index: usize) -> i64 {
        (index as f64 * 1000.0 / self.fps).round() as i64
    }
}

impl FrameSource for ImageSequenceSource {
    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn next_frame(&mut self) -> WorkerResult<Option<VideoFrame>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let index = self.next;
        let image = image::open(path)?;
        if (image.width(), image.height()) != self.dimensions {
            return Err(WorkerError::source_failed(format!(
                "{} is {}x{}, expected {}x{}",
                path.display(),
                image.width(),
                image.height(),
                self.dimensions.0,
                self.dimensions.1
            )));
        }
        self.next += 1;
        Ok(Some(VideoFrame::from_dynamic(&image, index as u64, self.timestamp_ms(index))))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.paths.len())
    }

    fn take_sensor_samples(&mut self, until_ms: i64) -> Vec<ImuSample> {
        drain_until(&mut self.sensor, until_ms)
    }
}

/// Frames held in memory.
#[derive(Debug, Default)]
pub struct MemoryFrameSource {
    frames: VecDeque<VideoFrame>,
    dimensions: (u32, u32),
    sensor: VecDeque<ImuSample>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<VideoFrame>) -> Self {
        let dimensions = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        Self {
            frames: frames.into(),
            dimensions,
            sensor: VecDeque::new(),
        }
    }

    pub fn with_sensor_samples(mut self, samples: Vec<ImuSample>) -> Self {
        self.sensor = sorted_samples(samples);
        self
    }
}

impl FrameSource for MemoryFrameSource {
    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn next_frame(&mut self) -> WorkerResult<Option<VideoFrame>> {
        Ok(self.frames.pop_front())
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.frames.len())
    }

    fn take_sensor_samples(&mut self, until_ms: i64) -> Vec<ImuSample> {
        drain_until(&mut self.sensor, until_ms)
    }
}
