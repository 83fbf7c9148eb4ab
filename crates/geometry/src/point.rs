use serde::{Deserialize, Serialize};

use folio_core::ValueObject;

/// A 2D coordinate in image space (origin top-left, y growing downwards).
///
/// Serialized as a `[x, y]` pair; anything else fails to deserialize.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl ValueObject for Point {}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Euclidean distance between two points.
pub fn distance(a: Point, b: Point) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// The vertex of `points` closest to `origin`, or `None` for an empty slice.
///
/// Ties keep the earliest vertex.
pub fn nearest_to(points: &[Point], origin: Point) -> Option<Point> {
    points
        .iter()
        .copied()
        .min_by(|a, b| distance(*a, origin).total_cmp(&distance(*b, origin)))
}
