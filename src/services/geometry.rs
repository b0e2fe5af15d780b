//! Geometry kernel - point-in-polygon and boundary distance
//!
//! All tests run in the polygon's local planar frame. Containment uses the
//! even-odd ray casting rule; a point on an edge counts as inside. A buffer
//! widens containment by comparing the point's distance to the boundary, the
//! polygon itself is never inflated (no self-intersection on concave shapes).

use crate::domain::polygon::{LocalProjection, Point2, Polygon};
use crate::domain::types::LatLng;

/// Points closer than this to an edge are treated as on the edge (0.1 mm)
const ON_EDGE_TOLERANCE_M: f64 = 1e-4;

/// Where a point lies relative to a (buffered) polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// Exact position inside or on the boundary
    Inside,
    /// Outside, but within the buffer distance of the boundary
    Boundary,
    /// Further than the buffer from the boundary
    Outside,
}

/// Result of measuring a point against a polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub containment: Containment,
    /// Distance to the nearest edge; `None` when the bounding box pre-filter
    /// already ruled the point out
    pub distance_m: Option<f64>,
}

/// Whether `point` is inside `polygon` or within `buffer_m` of its boundary
pub fn contains_point(polygon: &Polygon, point: LatLng, buffer_m: f64) -> bool {
    measure(polygon, point, buffer_m).containment != Containment::Outside
}

/// Unsigned distance in meters from `point` to the nearest polygon edge
pub fn distance_to_boundary(polygon: &Polygon, point: LatLng) -> f64 {
    let p = polygon.projection().project(point);
    boundary_distance(polygon.ring(), p)
}

/// Classify `point` against `polygon` with a buffer of `buffer_m` meters
pub fn measure(polygon: &Polygon, point: LatLng, buffer_m: f64) -> Measurement {
    let buffer_m = buffer_m.max(0.0);
    let p = polygon.projection().project(point);

    // Cheap reject: outside the buffered bounding box can't be Inside or Boundary
    if !polygon.bounds().contains(p, buffer_m + ON_EDGE_TOLERANCE_M) {
        return Measurement { containment: Containment::Outside, distance_m: None };
    }

    let distance = boundary_distance(polygon.ring(), p);
    let containment = if distance <= ON_EDGE_TOLERANCE_M || ray_cast(polygon.ring(), p) {
        Containment::Inside
    } else if distance <= buffer_m {
        Containment::Boundary
    } else {
        Containment::Outside
    };

    Measurement { containment, distance_m: Some(distance) }
}

/// Coordinate `east_m` / `north_m` meters away from `origin`
pub fn offset_meters(origin: LatLng, east_m: f64, north_m: f64) -> LatLng {
    LocalProjection::new(origin).unproject(Point2::new(east_m, north_m))
}

/// Even-odd ray cast towards +x
fn ray_cast(ring: &[Point2], p: Point2) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[j];
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn boundary_distance(ring: &[Point2], p: Point2) -> f64 {
    let n = ring.len();
    (0..n)
        .map(|i| segment_distance(p, ring[i], ring[(i + 1) % n]))
        .fold(f64::INFINITY, f64::min)
}

fn segment_distance(p: Point2, a: Point2, b: Point2) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0)
    };
    let cx = a.x + t * dx;
    let cy = a.y + t * dy;
    (p.x - cx).hypot(p.y - cy)
}
