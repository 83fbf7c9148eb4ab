//! Geometry helpers for page layout: points, polygons and polylines.
//!
//! Everything here is pure and stateless. Shapes validate their vertex count
//! on construction so that malformed geometry is rejected at the boundary,
//! before anything is persisted.

pub mod point;
pub mod shape;

pub use point::{Point, distance, nearest_to};
pub use shape::{BoundingBox, Polygon, Polyline};
