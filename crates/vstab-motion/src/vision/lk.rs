//! Pyramidal Lucas-Kanade sparse optical flow.
//!
//! Each point is tracked coarse-to-fine: the displacement found at one
//! pyramid level, doubled, seeds the next finer level. Per level the
//! template gradients are computed once and the displacement is refined
//! with Gauss-Newton steps until the update drops below `epsilon`.

use image::GrayImage;
use nalgebra::{Matrix2, Point2, Vector2};
use rayon::prelude::*;

use super::{FlowTracker, TrackedPoint};

/// Row-major single-channel float image.
#[derive(Debug, Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    /// 2x2 box downsample.
    fn half(&self) -> Self {
        let width = self.width / 2;
        let height = self.height / 2;
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = (2 * x, 2 * y);
                let sum = self.at(sx, sy) + self.at(sx + 1, sy) + self.at(sx, sy + 1) + self.at(sx + 1, sy + 1);
                data.push(sum / 4.0);
            }
        }
        Self { width, height, data }
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Bilinear sample with edge clamping.
    fn sample(&self, x: f64, y: f64) -> f64 {
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let top = self.at(x0, y0) as f64 * (1.0 - fx) + self.at(x1, y0) as f64 * fx;
        let bottom = self.at(x0, y1) as f64 * (1.0 - fx) + self.at(x1, y1) as f64 * fx;
        top * (1.0 - fy) + bottom * fy
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x <= (self.width - 1) as f64 && y <= (self.height - 1) as f64
    }
}

fn build_pyramid(image: &GrayImage, max_level: usize, min_size: usize) -> Vec<Plane> {
    let mut levels = vec![Plane::from_gray(image)];
    while levels.len() <= max_level {
        let Some(last) = levels.last() else { break };
        if last.width / 2 < min_size || last.height / 2 < min_size {
            break;
        }
        let next = last.half();
        levels.push(next);
    }
    levels
}

/// Pyramidal Lucas-Kanade tracker.
#[derive(Debug, Clone)]
pub struct PyramidalLkTracker {
    /// Tracking window half-size in pixels (default: 7, a 15x15 window)
    pub window_radius: usize,
    /// Coarsest pyramid level, 0 disables the pyramid (default: 3)
    pub max_level: usize,
    /// Gauss-Newton iterations per level (default: 30)
    pub max_iterations: usize,
    /// Convergence threshold on the update norm in pixels (default: 0.01)
    pub epsilon: f64,
    /// Minimum per-pixel eigenvalue of the gradient matrix (default: 1e-4)
    pub min_eigen_threshold: f64,
}

impl Default for PyramidalLkTracker {
    fn default() -> Self {
        Self {
            window_radius: 7,
            max_level: 3,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigen_threshold: 1e-4,
        }
    }
}

impl PyramidalLkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn track_point(&self, prev: &[Plane], curr: &[Plane], point: Point2<f64>) -> TrackedPoint {
        let r = self.window_radius as i64;
        let area = ((2 * r + 1) * (2 * r + 1)) as f64;
        let mut guess = Vector2::zeros();
        let mut error = 0.0;

        for level in (0..prev.len()).rev() {
            let (p_img, c_img) = (&prev[level], &curr[level]);
            let scale = (1u32 << level) as f64;
            let center = Vector2::new(point.x / scale, point.y / scale);

            // Template intensities and gradients are fixed for this level.
            let mut template = Vec::with_capacity(area as usize);
            let mut gradient = Matrix2::zeros();
            for dy in -r..=r {
                for dx in -r..=r {
                    let x = center.x + dx as f64;
                    let y = center.y + dy as f64;
                    let ix = (p_img.sample(x + 1.0, y) - p_img.sample(x - 1.0, y)) / 2.0;
                    let iy = (p_img.sample(x, y + 1.0) - p_img.sample(x, y - 1.0)) / 2.0;
                    gradient += Matrix2::new(ix * ix, ix * iy, ix * iy, iy * iy);
                    template.push((x, y, p_img.sample(x, y), ix, iy));
                }
            }

            let min_eigen = {
                let (a, b, c) = (gradient[(0, 0)], gradient[(0, 1)], gradient[(1, 1)]);
                ((a + c) - ((a - c) * (a - c) + 4.0 * b * b).sqrt()) / (2.0 * area)
            };
            let Some(inverse) = gradient.try_inverse().filter(|_| min_eigen >= self.min_eigen_threshold) else {
                if level == 0 {
                    return TrackedPoint::lost(point);
                }
                // Too little texture at this scale; carry the guess down.
                guess *= 2.0;
                continue;
            };

            let mut d = guess;
            for _ in 0..self.max_iterations {
                let mut mismatch = Vector2::zeros();
                for &(x, y, value, ix, iy) in &template {
                    let diff = value - c_img.sample(x + d.x, y + d.y);
                    mismatch += Vector2::new(diff * ix, diff * iy);
                }
                let step = inverse * mismatch;
                d += step;
                if !d.x.is_finite() || !d.y.is_finite() {
                    return TrackedPoint::lost(point);
                }
                if step.norm() < self.epsilon {
                    break;
                }
            }

            if level == 0 {
                error = template
                    .iter()
                    .map(|&(x, y, value, _, _)| (value - c_img.sample(x + d.x, y + d.y)).abs())
                    .sum::<f64>()
                    / area;
            }
            guess = if level > 0 { d * 2.0 } else { d };
        }

        let tracked = Point2::new(point.x + guess.x, point.y + guess.y);
        if !curr[0].contains(tracked.x, tracked.y) {
            return TrackedPoint::lost(tracked);
        }
        TrackedPoint {
            point: tracked,
            found: true,
            error,
        }
    }
}

impl FlowTracker for PyramidalLkTracker {
    fn name(&self) -> &'static str {
        "pyramidal_lk"
    }

    fn track(&self, prev: &GrayImage, curr: &GrayImage, points: &[Point2<f64>]) -> Vec<TrackedPoint> {
        if prev.dimensions() != curr.dimensions() || prev.width() == 0 || prev.height() == 0 {
            return points.iter().map(|&p| TrackedPoint::lost(p)).collect();
        }

        let min_size = 2 * self.window_radius + 1;
        let prev_pyramid = build_pyramid(prev, self.max_level, min_size);
        let curr_pyramid = build_pyramid(curr, self.max_level, min_size);

        points
            .par_iter()
            .map(|&p| {
                if !prev_pyramid[0].contains(p.x, p.y) {
                    return TrackedPoint::lost(p);
                }
                self.track_point(&prev_pyramid, &curr_pyramid, p)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Smooth blob pattern, shifted by a sub-pixel offset.
    fn blobs(width: u32, height: u32, shift: (f64, f64)) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let (x, y) = (x as f64 - shift.0, y as f64 - shift.1);
            let blob = |cx: f64, cy: f64, s: f64| (-((x - cx).powi(2) + (y - cy).powi(2)) / (2.0 * s * s)).exp();
            let v = 30.0 + 180.0 * blob(40.0, 40.0, 6.0) + 150.0 * blob(90.0, 60.0, 8.0) + 120.0 * blob(60.0, 95.0, 5.0);
            Luma([v.round().clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn test_tracks_translation() {
        let prev = blobs(128, 128, (0.0, 0.0));
        let curr = blobs(128, 128, (3.0, -2.0));
        let points = vec![Point2::new(36.0, 37.0), Point2::new(94.0, 56.0), Point2::new(58.0, 98.0)];

        let tracked = PyramidalLkTracker::new().track(&prev, &curr, &points);
        assert_eq!(tracked.len(), points.len());
        for (p, t) in points.iter().zip(&tracked) {
            assert!(t.found);
            assert!((t.point.x - p.x - 3.0).abs() < 0.3, "dx {}", t.point.x - p.x);
            assert!((t.point.y - p.y + 2.0).abs() < 0.3, "dy {}", t.point.y - p.y);
        }
    }

    #[test]
    fn test_flat_region_is_lost() {
        let flat = GrayImage::from_pixel(64, 64, Luma([90u8]));
        let tracked = PyramidalLkTracker::new().track(&flat, &flat, &[Point2::new(32.0, 32.0)]);
        assert!(!tracked[0].found);
    }

    #[test]
    fn test_outside_points_are_lost() {
        let image = blobs(64, 64, (0.0, 0.0));
        let tracked = PyramidalLkTracker::new().track(&image, &image, &[Point2::new(-5.0, 10.0)]);
        assert!(!tracked[0].found);
    }

    #[test]
    fn test_pyramid_stops_at_window_size() {
        let image = GrayImage::new(40, 40);
        let pyramid = build_pyramid(&image, 5, 15);
        assert_eq!(pyramid.len(), 2);
        assert_eq!((pyramid[1].width, pyramid[1].height), (20, 20));
    }
}
