//! Decoded frames handed to the estimators.

use image::{DynamicImage, GrayImage};

/// A single decoded frame in luma form.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: GrayImage,
    /// Zero-based position in the sequence
    pub index: u64,
    /// Presentation timestamp in milliseconds
    pub timestamp_ms: i64,
}

impl VideoFrame {
    pub fn new(image: GrayImage, index: u64, timestamp_ms: i64) -> Self {
        Self {
            image,
            index,
            timestamp_ms,
        }
    }

    /// Convert any decoded image to luma.
    pub fn from_dynamic(image: &DynamicImage, index: u64, timestamp_ms: i64) -> Self {
        Self::new(image.to_luma8(), index, timestamp_ms)
    }

    /// A uniform black frame, used by sensor-only pipelines.
    pub fn blank(width: u32, height: u32, index: u64, timestamp_ms: i64) -> Self {
        Self::new(GrayImage::new(width, height), index, timestamp_ms)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
