use serde::{Deserialize, Serialize};

use folio_core::{DomainError, DomainResult, ValueObject};

use crate::point::{Point, distance, nearest_to};

/// Closed polygon with at least three vertices.
///
/// The closing edge (last vertex back to the first) is implicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Polygon(Vec<Point>);

/// Open polyline with at least two vertices (e.g. a text baseline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Polyline(Vec<Point>);

/// Axis-aligned bounding box, `[xmin, ymin, xmax, ymax]` when flattened.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ValueObject for Polygon {}
impl ValueObject for Polyline {}
impl ValueObject for BoundingBox {}

fn points_from_raw(raw: &[Vec<f64>], what: &str) -> DomainResult<Vec<Point>> {
    raw.iter()
        .enumerate()
        .map(|(i, coords)| match coords.as_slice() {
            [x, y] if x.is_finite() && y.is_finite() => Ok(Point::new(*x, *y)),
            [_, _] => Err(DomainError::validation(format!(
                "{what}: vertex {i} has a non-finite coordinate"
            ))),
            other => Err(DomainError::validation(format!(
                "{what}: vertex {i} is not a 2D point ({} coordinates)",
                other.len()
            ))),
        })
        .collect()
}

fn bounds_of(points: &[Point]) -> BoundingBox {
    points.iter().fold(
        BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        },
        |b, p| BoundingBox {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        },
    )
}

impl Polygon {
    pub const MIN_VERTICES: usize = 3;

    pub fn new(points: Vec<Point>) -> DomainResult<Self> {
        if points.len() < Self::MIN_VERTICES {
            return Err(DomainError::validation(format!(
                "polygon needs at least {} points, it has {}",
                Self::MIN_VERTICES,
                points.len()
            )));
        }
        Ok(Self(points))
    }

    /// Validate raw coordinate arrays (e.g. decoded JSON) into a polygon.
    pub fn from_raw(raw: &[Vec<f64>]) -> DomainResult<Self> {
        Self::new(points_from_raw(raw, "polygon")?)
    }

    /// Rectangle polygon from a bounding box, clockwise from the top-left.
    pub fn from_box(b: BoundingBox) -> Self {
        Self(vec![
            Point::new(b.min_x, b.min_y),
            Point::new(b.min_x, b.max_y),
            Point::new(b.max_x, b.max_y),
            Point::new(b.max_x, b.min_y),
        ])
    }

    pub fn points(&self) -> &[Point] {
        &self.0
    }

    pub fn bounding_box(&self) -> BoundingBox {
        bounds_of(&self.0)
    }

    /// Vertex closest to `origin`.
    pub fn nearest_vertex(&self, origin: Point) -> Point {
        // non-empty by construction
        nearest_to(&self.0, origin).unwrap_or(self.0[0])
    }

    /// Whether `p` lies strictly inside the polygon (even-odd rule).
    ///
    /// Points on the boundary are not guaranteed either way.
    pub fn contains(&self, p: Point) -> bool {
        let pts = &self.0;
        let mut inside = false;
        let mut j = pts.len() - 1;
        for i in 0..pts.len() {
            let (a, b) = (pts[i], pts[j]);
            if (a.y > p.y) != (b.y > p.y) {
                let cross_x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if p.x < cross_x {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

impl TryFrom<Vec<Point>> for Polygon {
    type Error = DomainError;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<Polygon> for Vec<Point> {
    fn from(p: Polygon) -> Self {
        p.0
    }
}

impl Polyline {
    pub const MIN_VERTICES: usize = 2;

    pub fn new(points: Vec<Point>) -> DomainResult<Self> {
        if points.len() < Self::MIN_VERTICES {
            return Err(DomainError::validation(format!(
                "polyline needs at least {} points, it has {}",
                Self::MIN_VERTICES,
                points.len()
            )));
        }
        Ok(Self(points))
    }

    pub fn from_raw(raw: &[Vec<f64>]) -> DomainResult<Self> {
        Self::new(points_from_raw(raw, "polyline")?)
    }

    pub fn points(&self) -> &[Point] {
        &self.0
    }

    pub fn first(&self) -> Point {
        self.0[0]
    }

    pub fn last(&self) -> Point {
        self.0[self.0.len() - 1]
    }

    pub fn length(&self) -> f64 {
        self.0.windows(2).map(|w| distance(w[0], w[1])).sum()
    }

    pub fn bounding_box(&self) -> BoundingBox {
        bounds_of(&self.0)
    }

    /// Point at `fraction` (clamped to `0.0..=1.0`) of the total length.
    ///
    /// A zero-length polyline interpolates to its first vertex.
    pub fn interpolate(&self, fraction: f64) -> Point {
        let total = self.length();
        if total.is_nan() || total <= 0.0 {
            return self.first();
        }
        let mut remaining = total * fraction.clamp(0.0, 1.0);
        for w in self.0.windows(2) {
            let seg = distance(w[0], w[1]);
            if remaining <= seg && seg > 0.0 {
                let t = remaining / seg;
                return Point::new(w[0].x + (w[1].x - w[0].x) * t, w[0].y + (w[1].y - w[0].y) * t);
            }
            remaining -= seg;
        }
        self.last()
    }

    pub fn midpoint(&self) -> Point {
        self.interpolate(0.5)
    }
}

impl TryFrom<Vec<Point>> for Polyline {
    type Error = DomainError;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<Polyline> for Vec<Point> {
    fn from(p: Polyline) -> Self {
        p.0
    }
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}
