//! Trajectory records and translation bounds.

use serde::{Deserialize, Serialize};

use crate::transform::Transform2D;

/// Axis-aligned extent of a trajectory's translation component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl TrajectoryBounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounds of the translations in `transforms`, `None` when empty.
    pub fn from_transforms<'a, I>(transforms: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Transform2D>,
    {
        transforms.into_iter().fold(None, |acc, t| {
            let (x, y) = t.translation();
            Some(match acc {
                None => Self::new(x, y, x, y),
                Some(b) => Self::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y)),
            })
        })
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// `self - other` as `[min_x, min_y, max_x, max_y]`.
    pub fn diff(&self, other: &TrajectoryBounds) -> [f64; 4] {
        [
            self.min_x - other.min_x,
            self.min_y - other.min_y,
            self.max_x - other.max_x,
            self.max_y - other.max_y,
        ]
    }

    /// Move `(x, y)` toward these bounds by `amount` of its distance past
    /// each edge. `amount = 1` clamps; points inside are unchanged.
    pub fn pull_inside(&self, x: f64, y: f64, amount: f64) -> (f64, f64) {
        (
            pull_axis(x, self.min_x, self.max_x, amount),
            pull_axis(y, self.min_y, self.max_y, amount),
        )
    }

    /// True if `other` lies inside `self` expanded by `tolerance`.
    pub fn contains(&self, other: &TrajectoryBounds, tolerance: f64) -> bool {
        other.min_x >= self.min_x - tolerance
            && other.min_y >= self.min_y - tolerance
            && other.max_x <= self.max_x + tolerance
            && other.max_y <= self.max_y + tolerance
    }
}

fn pull_axis(value: f64, min: f64, max: f64, amount: f64) -> f64 {
    if amount >= 1.0 {
        value.clamp(min, max)
    } else if value < min {
        value + (min - value) * amount
    } else if value > max {
        value - (value - max) * amount
    } else {
        value
    }
}

/// Original, smoothed and optimized transforms of one sequence.
///
/// The original sequence is built incrementally; smoothed and optimized
/// sequences are committed together once the whole sequence has been
/// processed, so a reader never observes a half-written result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    original: Vec<Transform2D>,
    smoothed: Vec<Transform2D>,
    optimized: Vec<Transform2D>,
    original_bounds: Option<TrajectoryBounds>,
    smooth_bounds: Option<TrajectoryBounds>,
}

impl TrajectoryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an original transform; invalidates any committed result.
    pub fn push_original(&mut self, transform: Transform2D) {
        self.original.push(transform);
        self.smoothed.clear();
        self.optimized.clear();
        self.smooth_bounds = None;
        self.original_bounds = None;
    }

    /// Store the smoothed and optimized sequences for the current originals.
    ///
    /// Both sequences must have one entry per original transform.
    pub fn commit(&mut self, smoothed: Vec<Transform2D>, optimized: Vec<Transform2D>) -> bool {
        if smoothed.len() != self.original.len() || optimized.len() != self.original.len() {
            return false;
        }
        self.original_bounds = TrajectoryBounds::from_transforms(&self.original);
        self.smooth_bounds = TrajectoryBounds::from_transforms(&smoothed);
        self.smoothed = smoothed;
        self.optimized = optimized;
        true
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    /// True once [`TrajectoryRecord::commit`] succeeded for the current originals.
    pub fn is_optimized(&self) -> bool {
        !self.original.is_empty() && self.optimized.len() == self.original.len()
    }

    pub fn original(&self, index: usize) -> Transform2D {
        self.original.get(index).copied().unwrap_or_default()
    }

    pub fn smoothed(&self, index: usize) -> Transform2D {
        self.smoothed.get(index).copied().unwrap_or_default()
    }

    pub fn optimized(&self, index: usize) -> Transform2D {
        self.optimized.get(index).copied().unwrap_or_default()
    }

    pub fn originals(&self) -> &[Transform2D] {
        &self.original
    }

    pub fn smoothed_all(&self) -> &[Transform2D] {
        &self.smoothed
    }

    pub fn optimized_all(&self) -> &[Transform2D] {
        &self.optimized
    }

    pub fn original_bounds(&self) -> Option<TrajectoryBounds> {
        self.original_bounds
            .or_else(|| TrajectoryBounds::from_transforms(&self.original))
    }

    pub fn smooth_bounds(&self) -> Option<TrajectoryBounds> {
        self.smooth_bounds
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
