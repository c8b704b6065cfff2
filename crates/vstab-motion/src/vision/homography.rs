//! Normalized DLT homography inside an adaptive RANSAC loop.
//!
//! Minimal samples of four correspondences are drawn with a seeded RNG so
//! results are reproducible. The best consensus set is refitted with all
//! its inliers before returning.

use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{HomographyFit, HomographySolver};

const MIN_SAMPLES: usize = 4;

/// Collinearity threshold on the doubled triangle area, in squared pixels.
const DEGENERATE_AREA: f64 = 1e-6;

/// Hartley normalization: zero mean, mean distance sqrt(2).
fn normalize_points(points: &[Point2<f64>]) -> Option<(Vec<Point2<f64>>, Matrix3<f64>)> {
    let n = points.len() as f64;
    if points.is_empty() {
        return None;
    }
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = points.iter().map(|p| (p.x - cx).hypot(p.y - cy)).sum::<f64>() / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let transform = Matrix3::new(
        s, 0.0, -s * cx, //
        0.0, s, -s * cy, //
        0.0, 0.0, 1.0,
    );
    let normalized = points
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((normalized, transform))
}

/// Direct linear transform over all given correspondences.
///
/// The result is scaled so `H[2,2] == 1` whenever that entry is non-zero.
pub fn dlt(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < MIN_SAMPLES || dst.len() != n {
        return None;
    }
    let (src_n, t_src) = normalize_points(src)?;
    let (dst_n, t_dst) = normalize_points(dst)?;

    // Pad to a square system so V^T always carries the null vector.
    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (p, q)) in src_n.iter().zip(&dst_n).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        let (r0, r1) = (2 * i, 2 * i + 1);

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;
    let h = v_t.row(smallest);

    let mut normalized = Matrix3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            normalized[(r, c)] = h[3 * r + c];
        }
    }

    let mut matrix = t_dst.try_inverse()? * normalized * t_src;
    let scale = matrix[(2, 2)];
    if scale.abs() > f64::EPSILON {
        matrix /= scale;
    }
    matrix.iter().all(|v| v.is_finite()).then_some(matrix)
}

/// Euclidean distance between `H · src` and `dst`.
pub fn reprojection_error(h: &Matrix3<f64>, src: &Point2<f64>, dst: &Point2<f64>) -> f64 {
    let projected = h * Vector3::new(src.x, src.y, 1.0);
    if projected.z.abs() <= f64::EPSILON {
        return f64::INFINITY;
    }
    (projected.x / projected.z - dst.x).hypot(projected.y / projected.z - dst.y)
}

fn has_collinear_triple(points: &[Point2<f64>]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let (a, b, c) = (points[i], points[j], points[k]);
                let area = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
                if area.abs() < DEGENERATE_AREA {
                    return true;
                }
            }
        }
    }
    false
}

/// RANSAC homography solver.
#[derive(Debug, Clone)]
pub struct RansacHomography {
    /// Upper bound on sampling iterations (default: 2000)
    pub max_iterations: usize,
    /// Probability of drawing at least one outlier-free sample (default: 0.995)
    pub confidence: f64,
    /// RNG seed for sample selection (default: 42)
    pub seed: u64,
}

impl Default for RansacHomography {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            confidence: 0.995,
            seed: 42,
        }
    }
}

impl RansacHomography {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn inlier_mask(h: &Matrix3<f64>, src: &[Point2<f64>], dst: &[Point2<f64>], threshold: f64) -> Vec<bool> {
        src.iter()
            .zip(dst)
            .map(|(s, d)| reprojection_error(h, s, d) <= threshold)
            .collect()
    }

    /// Iterations needed to hit `confidence` given the current inlier ratio.
    fn required_iterations(&self, inlier_ratio: f64) -> usize {
        let outlier_free = inlier_ratio.powi(MIN_SAMPLES as i32);
        if outlier_free >= 1.0 - f64::EPSILON {
            return 1;
        }
        if outlier_free <= f64::EPSILON {
            return self.max_iterations;
        }
        let needed = (1.0 - self.confidence).ln() / (1.0 - outlier_free).ln();
        (needed.ceil().max(1.0) as usize).min(self.max_iterations)
    }
}

impl HomographySolver for RansacHomography {
    fn name(&self) -> &'static str {
        "ransac_dlt"
    }

    fn find_homography(
        &self,
        src: &[Point2<f64>],
        dst: &[Point2<f64>],
        reprojection_threshold: f64,
    ) -> Option<HomographyFit> {
        let n = src.len();
        if n < MIN_SAMPLES || dst.len() != n {
            return None;
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
        let mut budget = self.max_iterations;
        let mut iteration = 0;

        while iteration < budget {
            iteration += 1;
            let sample = rand::seq::index::sample(&mut rng, n, MIN_SAMPLES).into_vec();
            let s: Vec<_> = sample.iter().map(|&i| src[i]).collect();
            let d: Vec<_> = sample.iter().map(|&i| dst[i]).collect();
            if has_collinear_triple(&s) || has_collinear_triple(&d) {
                continue;
            }
            let Some(h) = dlt(&s, &d) else { continue };

            let mask = Self::inlier_mask(&h, src, dst, reprojection_threshold);
            let count = mask.iter().filter(|&&m| m).count();
            if best.as_ref().map_or(true, |(_, _, c)| count > *c) {
                budget = self.required_iterations(count as f64 / n as f64);
                best = Some((h, mask, count));
            }
        }

        let (h, mask, count) = best?;
        if count < MIN_SAMPLES {
            return None;
        }

        // Refit on the consensus set; keep it only if it does not lose support.
        let inlier_src: Vec<_> = src.iter().zip(&mask).filter(|&(_, &m)| m).map(|(p, _)| *p).collect();
        let inlier_dst: Vec<_> = dst.iter().zip(&mask).filter(|&(_, &m)| m).map(|(p, _)| *p).collect();
        if let Some(refit) = dlt(&inlier_src, &inlier_dst) {
            let refit_mask = Self::inlier_mask(&refit, src, dst, reprojection_threshold);
            if refit_mask.iter().filter(|&&m| m).count() >= count {
                return Some(HomographyFit {
                    matrix: refit,
                    inliers: refit_mask,
                });
            }
        }

        Some(HomographyFit {
            matrix: h,
            inliers: mask,
        })
    }
}
