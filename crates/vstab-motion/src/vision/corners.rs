//! Shi-Tomasi corner detection with BRIEF descriptors.
//!
//! Corners are ranked by the smaller eigenvalue of the local structure
//! tensor, filtered against `quality_level * max_response`, then thinned
//! greedily so no two kept corners are closer than `min_distance`.

use image::{imageops, GrayImage};
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Descriptor, Feature, FeatureDetector};

/// Half-size of the BRIEF sampling patch.
const PATCH_RADIUS: i32 = 15;

/// Fixed seed so descriptors are comparable across detector instances.
const PATTERN_SEED: u64 = 0x5EED_B21E;

/// Shi-Tomasi corners plus 256-bit BRIEF descriptors.
#[derive(Debug, Clone)]
pub struct ShiTomasiDetector {
    /// Minimum accepted response as a fraction of the strongest (default: 0.01)
    pub quality_level: f64,
    /// Minimum distance between kept corners in pixels (default: 8.0)
    pub min_distance: f64,
    /// Structure tensor window radius (default: 2, a 5x5 window)
    pub block_radius: usize,
    /// Blur applied before sampling descriptors (default: 2.0)
    pub descriptor_blur: f32,
    pattern: Vec<[i32; 4]>,
}

impl Default for ShiTomasiDetector {
    fn default() -> Self {
        Self {
            quality_level: 0.01,
            min_distance: 8.0,
            block_radius: 2,
            descriptor_blur: 2.0,
            pattern: brief_pattern(PATTERN_SEED),
        }
    }
}

impl ShiTomasiDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Corners at least `border` pixels away from the image edge.
    fn corners_with_border(&self, image: &GrayImage, max_corners: usize, border: usize) -> Vec<(Point2<f64>, f64)> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let margin = border.max(self.block_radius + 1);
        if max_corners == 0 || width <= 2 * margin || height <= 2 * margin {
            return Vec::new();
        }

        let response = self.min_eigen_response(image);
        let max_response = response.iter().cloned().fold(0.0_f64, f64::max);
        if max_response <= f64::EPSILON {
            return Vec::new();
        }
        let threshold = max_response * self.quality_level;

        let mut candidates = Vec::new();
        for y in margin..height - margin {
            for x in margin..width - margin {
                let r = response[y * width + x];
                if r < threshold {
                    continue;
                }
                let is_peak = (y - 1..=y + 1).all(|ny| {
                    (x - 1..=x + 1).all(|nx| (nx == x && ny == y) || response[ny * width + nx] <= r)
                });
                if is_peak {
                    candidates.push((x, y, r));
                }
            }
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        self.thin(candidates, width, height, max_corners)
    }

    /// Minimum eigenvalue of the structure tensor at every pixel.
    fn min_eigen_response(&self, image: &GrayImage) -> Vec<f64> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let pixel = |x: usize, y: usize| image.get_pixel(x as u32, y as u32)[0] as f64;

        let mut gxx = vec![0.0; width * height];
        let mut gxy = vec![0.0; width * height];
        let mut gyy = vec![0.0; width * height];
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let dx = (pixel(x + 1, y - 1) + 2.0 * pixel(x + 1, y) + pixel(x + 1, y + 1))
                    - (pixel(x - 1, y - 1) + 2.0 * pixel(x - 1, y) + pixel(x - 1, y + 1));
                let dy = (pixel(x - 1, y + 1) + 2.0 * pixel(x, y + 1) + pixel(x + 1, y + 1))
                    - (pixel(x - 1, y - 1) + 2.0 * pixel(x, y - 1) + pixel(x + 1, y - 1));
                let i = y * width + x;
                gxx[i] = dx * dx;
                gxy[i] = dx * dy;
                gyy[i] = dy * dy;
            }
        }

        let r = self.block_radius;
        let mut response = vec![0.0; width * height];
        for y in r + 1..height.saturating_sub(r + 1) {
            for x in r + 1..width.saturating_sub(r + 1) {
                let (mut a, mut b, mut c) = (0.0, 0.0, 0.0);
                for wy in y - r..=y + r {
                    for wx in x - r..=x + r {
                        let i = wy * width + wx;
                        a += gxx[i];
                        b += gxy[i];
                        c += gyy[i];
                    }
                }
                let half_trace = (a + c) / 2.0;
                let det_term = ((a - c) / 2.0).hypot(b);
                response[y * width + x] = half_trace - det_term;
            }
        }
        response
    }

    /// Greedy minimum-distance suppression on a coarse grid.
    fn thin(
        &self,
        candidates: Vec<(usize, usize, f64)>,
        width: usize,
        height: usize,
        max_corners: usize,
    ) -> Vec<(Point2<f64>, f64)> {
        let cell = self.min_distance.max(1.0);
        let grid_w = (width as f64 / cell).ceil() as usize + 1;
        let grid_h = (height as f64 / cell).ceil() as usize + 1;
        let mut grid: Vec<Vec<Point2<f64>>> = vec![Vec::new(); grid_w * grid_h];
        let min_sq = self.min_distance * self.min_distance;

        let mut kept = Vec::new();
        for (x, y, r) in candidates {
            let p = Point2::new(x as f64, y as f64);
            let (cx, cy) = ((p.x / cell) as usize, (p.y / cell) as usize);
            let crowded = (cy.saturating_sub(1)..=(cy + 1).min(grid_h - 1)).any(|gy| {
                (cx.saturating_sub(1)..=(cx + 1).min(grid_w - 1)).any(|gx| {
                    grid[gy * grid_w + gx]
                        .iter()
                        .any(|q| (*q - p).norm_squared() < min_sq)
                })
            });
            if crowded {
                continue;
            }
            grid[cy * grid_w + cx].push(p);
            kept.push((p, r));
            if kept.len() >= max_corners {
                break;
            }
        }
        kept
    }

    fn describe(&self, blurred: &GrayImage, point: &Point2<f64>) -> Descriptor {
        let (x, y) = (point.x as i32, point.y as i32);
        let sample = |dx: i32, dy: i32| blurred.get_pixel((x + dx) as u32, (y + dy) as u32)[0];

        let mut descriptor = [0u8; 32];
        for (bit, [x1, y1, x2, y2]) in self.pattern.iter().enumerate() {
            if sample(*x1, *y1) < sample(*x2, *y2) {
                descriptor[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptor
    }
}

impl FeatureDetector for ShiTomasiDetector {
    fn name(&self) -> &'static str {
        "shi_tomasi_brief"
    }

    fn detect_features(&self, image: &GrayImage, max_features: usize) -> Vec<Feature> {
        let corners = self.corners_with_border(image, max_features, PATCH_RADIUS as usize + 1);
        if corners.is_empty() {
            return Vec::new();
        }

        let blurred = imageops::blur(image, self.descriptor_blur);
        corners
            .into_iter()
            .map(|(point, response)| Feature {
                descriptor: self.describe(&blurred, &point),
                point,
                response,
            })
            .collect()
    }

    fn detect_corners(&self, image: &GrayImage, max_corners: usize) -> Vec<Point2<f64>> {
        self.corners_with_border(image, max_corners, self.block_radius + 2)
            .into_iter()
            .map(|(point, _)| point)
            .collect()
    }
}

/// Random point pairs inside the descriptor patch.
fn brief_pattern(seed: u64) -> Vec<[i32; 4]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..256)
        .map(|_| {
            [
                rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
            ]
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Luma;

    /// A frame with a few bright squares on a dark background.
    pub(crate) fn squares_image(width: u32, height: u32, offset: (i32, i32)) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let (x, y) = (x as i32 - offset.0, y as i32 - offset.1);
            let in_square = |cx: i32, cy: i32, half: i32| (x - cx).abs() <= half && (y - cy).abs() <= half;
            if in_square(40, 40, 10) || in_square(100, 60, 8) || in_square(60, 100, 12) {
                Luma([220u8])
            } else if in_square(130, 120, 6) {
                Luma([140u8])
            } else {
                Luma([20u8])
            }
        })
    }

    /// Blocky pseudo-random texture, rich in distinct corners.
    pub(crate) fn textured_image(width: u32, height: u32, offset: (i32, i32)) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let bx = (x as i32 - offset.0).div_euclid(6) as i64;
            let by = (y as i32 - offset.1).div_euclid(6) as i64;
            let h = (bx * 73_856_093) ^ (by * 19_349_663) ^ (bx * by * 83_492_791);
            Luma([(h.rem_euclid(211) + 20) as u8])
        })
    }

    #[test]
    fn test_detects_square_corners() {
        let detector = ShiTomasiDetector::new();
        let corners = detector.detect_corners(&squares_image(160, 160, (0, 0)), 100);

        assert!(corners.len() >= 12, "found {}", corners.len());
        // Corner of the first square at (30, 30)
        assert!(corners.iter().any(|p| (p.x - 30.0).abs() <= 2.0 && (p.y - 30.0).abs() <= 2.0));
    }

    #[test]
    fn test_respects_max_and_min_distance() {
        let detector = ShiTomasiDetector::new();
        let corners = detector.detect_corners(&squares_image(160, 160, (0, 0)), 5);
        assert!(corners.len() <= 5);

        for (i, a) in corners.iter().enumerate() {
            for b in corners.iter().skip(i + 1) {
                assert!((*a - *b).norm() >= detector.min_distance);
            }
        }
    }

    #[test]
    fn test_flat_image_has_no_corners() {
        let detector = ShiTomasiDetector::new();
        let flat = GrayImage::from_pixel(64, 64, Luma([128u8]));
        assert!(detector.detect_corners(&flat, 50).is_empty());
        assert!(detector.detect_features(&flat, 50).is_empty());
    }

    #[test]
    fn test_descriptors_stable_under_translation() {
        let detector = ShiTomasiDetector::new();
        let a = detector.detect_features(&squares_image(160, 160, (0, 0)), 50);
        let b = detector.detect_features(&squares_image(160, 160, (3, 2)), 50);
        assert!(!a.is_empty());

        let shifted = b
            .iter()
            .find(|f| (f.point.x - (a[0].point.x + 3.0)).abs() < 0.5 && (f.point.y - (a[0].point.y + 2.0)).abs() < 0.5)
            .expect("shifted corner detected");
        assert_eq!(shifted.descriptor, a[0].descriptor);
    }
}
