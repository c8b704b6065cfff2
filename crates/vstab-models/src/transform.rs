//! 2D affine transform algebra.
//!
//! A [`Transform2D`] is stored as a 3x3 homogeneous matrix built as
//! `M = T · R · S` (scale, then rotate, then translate when applied to a
//! point). The five decomposed parameters live in [`MotionParams`].
//!
//! ```text
//! | sx·cosθ  -sy·sinθ  tx |
//! | sx·sinθ   sy·cosθ  ty |
//! |   0         0       1 |
//! ```
//!
//! The free functions in this module operate on raw matrices and never
//! fail; [`Transform2D`] wraps a matrix that has passed [`is_valid`].

use nalgebra::Matrix3;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Determinant magnitude below which a matrix is treated as singular.
pub const SINGULAR_EPSILON: f64 = 1e-10;

/// Decomposed parameters of an affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MotionParams {
    /// Horizontal scale factor (> 0)
    pub scale_x: f64,
    /// Vertical scale factor (> 0)
    pub scale_y: f64,
    /// Rotation in degrees, in (-180, 180]
    pub rotation_deg: f64,
    /// Horizontal translation in pixels
    pub translation_x: f64,
    /// Vertical translation in pixels
    pub translation_y: f64,
}

impl MotionParams {
    /// Parameters of the identity transform.
    pub const IDENTITY: MotionParams = MotionParams {
        scale_x: 1.0,
        scale_y: 1.0,
        rotation_deg: 0.0,
        translation_x: 0.0,
        translation_y: 0.0,
    };

    /// Number of decomposed parameters.
    pub const LEN: usize = 5;

    pub fn new(
        scale_x: f64,
        scale_y: f64,
        rotation_deg: f64,
        translation_x: f64,
        translation_y: f64,
    ) -> Self {
        Self {
            scale_x,
            scale_y,
            rotation_deg,
            translation_x,
            translation_y,
        }
    }

    /// Parameters as `[scale_x, scale_y, rotation_deg, translation_x, translation_y]`.
    pub fn to_array(&self) -> [f64; 5] {
        [
            self.scale_x,
            self.scale_y,
            self.rotation_deg,
            self.translation_x,
            self.translation_y,
        ]
    }

    /// Inverse of [`MotionParams::to_array`].
    pub fn from_array(values: [f64; 5]) -> Self {
        Self::new(values[0], values[1], values[2], values[3], values[4])
    }

    /// Linear interpolation: `self * weight_self + other * (1 - weight_self)`.
    pub fn lerp(&self, other: &MotionParams, weight_self: f64) -> Self {
        let a = self.to_array();
        let b = other.to_array();
        let weight_other = 1.0 - weight_self;
        let mut out = [0.0; 5];
        for i in 0..5 {
            out[i] = a[i] * weight_self + b[i] * weight_other;
        }
        Self::from_array(out)
    }

    /// True when every parameter is finite and both scales are positive.
    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite()) && self.scale_x > 0.0 && self.scale_y > 0.0
    }
}

impl Default for MotionParams {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Per-parameter bounds used to cap single-frame estimation error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MotionLimits {
    /// Maximum absolute horizontal translation in pixels
    pub max_translation_x: f64,
    /// Maximum absolute vertical translation in pixels
    pub max_translation_y: f64,
    /// Scale is clamped to `[1 - d, 1 + d]`
    pub max_scale_delta: f64,
    /// Rotation is clamped to `[-r, r]` degrees
    pub max_rotation_deg: f64,
}

impl MotionLimits {
    /// Build limits with an absolute translation bound applied to both axes.
    pub fn new(max_translation: f64, max_scale_delta: f64, max_rotation_deg: f64) -> Self {
        Self {
            max_translation_x: max_translation.abs(),
            max_translation_y: max_translation.abs(),
            max_scale_delta: max_scale_delta.clamp(0.0, 0.99),
            max_rotation_deg: max_rotation_deg.abs().min(180.0),
        }
    }

    /// Build limits whose translation bound is a fraction of the frame size.
    pub fn for_frame(
        width: u32,
        height: u32,
        translation_fraction: f64,
        max_scale_delta: f64,
        max_rotation_deg: f64,
    ) -> Self {
        let fraction = translation_fraction.abs();
        Self {
            max_translation_x: width as f64 * fraction,
            max_translation_y: height as f64 * fraction,
            ..Self::new(0.0, max_scale_delta, max_rotation_deg)
        }
    }
}

/// Wrap an angle in degrees into (-180, 180].
pub fn normalize_angle(deg: f64) -> f64 {
    let mut a = deg % 360.0;
    if a <= -180.0 {
        a += 360.0;
    } else if a > 180.0 {
        a -= 360.0;
    }
    a
}

/// Split a matrix into scale, rotation and translation.
pub fn decompose(m: &Matrix3<f64>) -> MotionParams {
    let scale_x = m[(0, 0)].hypot(m[(1, 0)]);
    let scale_y = m[(0, 1)].hypot(m[(1, 1)]);
    let rotation_deg = normalize_angle(m[(1, 0)].atan2(m[(0, 0)]).to_degrees());

    MotionParams {
        scale_x,
        scale_y,
        rotation_deg,
        translation_x: m[(0, 2)],
        translation_y: m[(1, 2)],
    }
}

/// Build `T · R · S` from decomposed parameters.
pub fn compose(p: &MotionParams) -> Matrix3<f64> {
    let scale = Matrix3::new(
        p.scale_x, 0.0, 0.0, //
        0.0, p.scale_y, 0.0, //
        0.0, 0.0, 1.0,
    );
    let (sin, cos) = p.rotation_deg.to_radians().sin_cos();
    let rotation = Matrix3::new(
        cos, -sin, 0.0, //
        sin, cos, 0.0, //
        0.0, 0.0, 1.0,
    );
    let translation = Matrix3::new(
        1.0, 0.0, p.translation_x, //
        0.0, 1.0, p.translation_y, //
        0.0, 0.0, 1.0,
    );

    translation * rotation * scale
}

/// False if any entry is NaN/Inf or the matrix is singular.
pub fn is_valid(m: &Matrix3<f64>) -> bool {
    if m.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let det = m.determinant();
    det.is_finite() && det.abs() > SINGULAR_EPSILON && m.try_inverse().is_some()
}

/// Clamp every decomposed parameter into `limits` and recompose.
pub fn constrain(m: &Matrix3<f64>, limits: &MotionLimits) -> Matrix3<f64> {
    let p = decompose(m);
    let min_scale = 1.0 - limits.max_scale_delta;
    let max_scale = 1.0 + limits.max_scale_delta;

    compose(&MotionParams {
        scale_x: p.scale_x.clamp(min_scale, max_scale),
        scale_y: p.scale_y.clamp(min_scale, max_scale),
        rotation_deg: p
            .rotation_deg
            .clamp(-limits.max_rotation_deg, limits.max_rotation_deg),
        translation_x: p
            .translation_x
            .clamp(-limits.max_translation_x, limits.max_translation_x),
        translation_y: p
            .translation_y
            .clamp(-limits.max_translation_y, limits.max_translation_y),
    })
}

/// Interpolate the decomposed parameters of two matrices.
pub fn weighted_average(a: &Matrix3<f64>, b: &Matrix3<f64>, weight_a: f64) -> Matrix3<f64> {
    compose(&decompose(a).lerp(&decompose(b), weight_a))
}

/// Matrix inverse, or identity when the matrix cannot be inverted.
pub fn inverse(m: &Matrix3<f64>) -> Matrix3<f64> {
    if !is_valid(m) {
        return Matrix3::identity();
    }
    m.try_inverse().unwrap_or_else(Matrix3::identity)
}

/// Append a validated inter-frame transform to a running cumulative one.
pub fn accumulate(previous: &Matrix3<f64>, validated: &Matrix3<f64>) -> Matrix3<f64> {
    previous * validated
}

/// Error returned when a matrix fails validation.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid transform: {0}")]
pub struct InvalidTransform(pub String);

/// A validated 2D affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransformRepr", into = "TransformRepr")]
pub struct Transform2D {
    matrix: Matrix3<f64>,
}

impl Transform2D {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Wrap a matrix if it passes [`is_valid`].
    pub fn from_matrix(matrix: Matrix3<f64>) -> Option<Self> {
        is_valid(&matrix).then_some(Self { matrix })
    }

    /// Compose a transform from decomposed parameters.
    pub fn from_params(params: &MotionParams) -> Option<Self> {
        if !params.is_valid() {
            return None;
        }
        Self::from_matrix(compose(params))
    }

    /// Pure translation.
    pub fn from_translation(tx: f64, ty: f64) -> Self {
        Self::from_params(&MotionParams {
            translation_x: tx,
            translation_y: ty,
            ..MotionParams::IDENTITY
        })
        .unwrap_or_default()
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn params(&self) -> MotionParams {
        decompose(&self.matrix)
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.matrix[(0, 2)], self.matrix[(1, 2)])
    }

    /// Replace the translation column, keeping scale and rotation.
    pub fn with_translation(&self, tx: f64, ty: f64) -> Self {
        let mut matrix = self.matrix;
        matrix[(0, 2)] = tx;
        matrix[(1, 2)] = ty;
        Self::from_matrix(matrix).unwrap_or(*self)
    }

    pub fn inverse(&self) -> Self {
        Self {
            matrix: inverse(&self.matrix),
        }
    }

    /// `self · delta`; keeps `self` if the product is not valid.
    pub fn accumulate(&self, delta: &Transform2D) -> Self {
        Self::from_matrix(accumulate(&self.matrix, &delta.matrix)).unwrap_or(*self)
    }

    /// Clamp into `limits`, dropping any projective component.
    pub fn constrain(&self, limits: &MotionLimits) -> Self {
        Self::from_matrix(constrain(&self.matrix, limits)).unwrap_or_default()
    }

    /// Parameter-wise interpolation towards `other`.
    pub fn weighted_average(&self, other: &Transform2D, weight_self: f64) -> Self {
        Self::from_matrix(weighted_average(&self.matrix, &other.matrix, weight_self))
            .unwrap_or(*self)
    }

    /// Map a point through the transform.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        let w = m[(2, 0)] * x + m[(2, 1)] * y + m[(2, 2)];
        let w = if w.abs() < f64::EPSILON { f64::EPSILON } else { w };
        (
            (m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)]) / w,
            (m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)]) / w,
        )
    }

    /// Entry-wise comparison within `epsilon`.
    pub fn approx_eq(&self, other: &Transform2D, epsilon: f64) -> bool {
        self.matrix
            .iter()
            .zip(other.matrix.iter())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }

    pub fn is_identity(&self, epsilon: f64) -> bool {
        self.approx_eq(&Self::identity(), epsilon)
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

/// Wire form: row-major matrix plus decomposed parameters for readability.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransformRepr {
    matrix: [[f64; 3]; 3],
    #[serde(default, skip_deserializing)]
    params: Option<MotionParams>,
}

impl From<Transform2D> for TransformRepr {
    fn from(t: Transform2D) -> Self {
        let m = t.matrix;
        Self {
            matrix: [
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
            ],
            params: Some(t.params()),
        }
    }
}

impl TryFrom<TransformRepr> for Transform2D {
    type Error = InvalidTransform;

    fn try_from(repr: TransformRepr) -> Result<Self, Self::Error> {
        let r = repr.matrix;
        let matrix = Matrix3::new(
            r[0][0], r[0][1], r[0][2], //
            r[1][0], r[1][1], r[1][2], //
            r[2][0], r[2][1], r[2][2],
        );
        Self::from_matrix(matrix)
            .ok_or_else(|| InvalidTransform("matrix is singular or not finite".to_string()))
    }
}
