//! Polygon model and the local planar projection it is evaluated in
//!
//! A polygon is validated once at construction and never changes afterwards.
//! Vertices are projected into a local equirectangular frame (meters) centred
//! on the vertex centroid, so containment tests only project the test point.

use crate::domain::error::{GeofenceError, GeofenceResult};
use crate::domain::types::LatLng;

/// Mean Earth radius (IUGG) in meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Smallest projected area accepted for a polygon (square meters)
const MIN_AREA_M2: f64 = 1e-6;

/// Normalize a longitude into [-180, 180)
#[inline]
pub fn normalize_longitude(lng: f64) -> f64 {
    (lng + 180.0).rem_euclid(360.0) - 180.0
}

/// Point in the local planar frame (x = east, y = north, meters)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounds of a projected ring
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    fn from_points(points: &[Point2]) -> Self {
        points.iter().fold(
            Bounds {
                min_x: f64::INFINITY,
                min_y: f64::INFINITY,
                max_x: f64::NEG_INFINITY,
                max_y: f64::NEG_INFINITY,
            },
            |b, p| Bounds {
                min_x: b.min_x.min(p.x),
                min_y: b.min_y.min(p.y),
                max_x: b.max_x.max(p.x),
                max_y: b.max_y.max(p.y),
            },
        )
    }

    /// Whether `p` lies within the bounds grown by `margin_m` on every side
    #[inline]
    pub fn contains(&self, p: Point2, margin_m: f64) -> bool {
        p.x >= self.min_x - margin_m
            && p.x <= self.max_x + margin_m
            && p.y >= self.min_y - margin_m
            && p.y <= self.max_y + margin_m
    }
}

/// Equirectangular projection around a fixed origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    origin: LatLng,
    cos_lat: f64,
}

impl LocalProjection {
    pub fn new(origin: LatLng) -> Self {
        let origin = LatLng::new(origin.lat, normalize_longitude(origin.lng));
        // Keep the scale finite at the poles
        let cos_lat = origin.lat.to_radians().cos().max(1e-12);
        Self { origin, cos_lat }
    }

    #[inline]
    pub fn origin(&self) -> LatLng {
        self.origin
    }

    /// Project a coordinate into local meters. Longitude differences are
    /// wrapped so points across the antimeridian stay contiguous.
    #[inline]
    pub fn project(&self, p: LatLng) -> Point2 {
        let dlng = normalize_longitude(p.lng - self.origin.lng);
        let dlat = p.lat - self.origin.lat;
        Point2::new(
            EARTH_RADIUS_M * dlng.to_radians() * self.cos_lat,
            EARTH_RADIUS_M * dlat.to_radians(),
        )
    }

    /// Inverse of [`LocalProjection::project`]
    #[inline]
    pub fn unproject(&self, p: Point2) -> LatLng {
        let lat = self.origin.lat + (p.y / EARTH_RADIUS_M).to_degrees();
        let lng = self.origin.lng + (p.x / (EARTH_RADIUS_M * self.cos_lat)).to_degrees();
        LatLng::new(lat, normalize_longitude(lng))
    }
}

/// Immutable, validated geofence polygon
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<LatLng>,
    projection: LocalProjection,
    ring: Vec<Point2>,
    bounds: Bounds,
    area_m2: f64,
}

impl Polygon {
    /// Build a polygon from an implicitly closed vertex ring.
    ///
    /// Fails with `InvalidPolygon` for fewer than 3 vertices, non-finite or
    /// out-of-range coordinates, and zero-area rings.
    pub fn new(vertices: Vec<LatLng>) -> GeofenceResult<Self> {
        if vertices.len() < 3 {
            return Err(GeofenceError::invalid_polygon(format!(
                "polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }

        for (i, v) in vertices.iter().enumerate() {
            if !v.lat.is_finite() || !v.lng.is_finite() {
                return Err(GeofenceError::invalid_polygon(format!(
                    "vertex {} has non-finite coordinates",
                    i
                )));
            }
            if v.lat.abs() > 90.0 {
                return Err(GeofenceError::invalid_polygon(format!(
                    "vertex {} latitude {} out of range",
                    i, v.lat
                )));
            }
        }

        let vertices: Vec<LatLng> = vertices
            .into_iter()
            .map(|v| LatLng::new(v.lat, normalize_longitude(v.lng)))
            .collect();

        let projection = LocalProjection::new(centroid(&vertices));
        let ring: Vec<Point2> = vertices.iter().map(|v| projection.project(*v)).collect();
        let area_m2 = shoelace_area(&ring);

        if area_m2 < MIN_AREA_M2 {
            return Err(GeofenceError::invalid_polygon(format!(
                "polygon has zero area ({:.3e} m2)",
                area_m2
            )));
        }

        let bounds = Bounds::from_points(&ring);
        Ok(Self { vertices, projection, ring, bounds, area_m2 })
    }

    /// Build a polygon from `(east, north)` offsets in meters around `origin`
    pub fn from_local_meters(origin: LatLng, offsets: &[(f64, f64)]) -> GeofenceResult<Self> {
        let projection = LocalProjection::new(origin);
        let vertices =
            offsets.iter().map(|&(x, y)| projection.unproject(Point2::new(x, y))).collect();
        Self::new(vertices)
    }

    /// Vertices with normalized longitudes
    pub fn vertices(&self) -> &[LatLng] {
        &self.vertices
    }

    pub fn projection(&self) -> &LocalProjection {
        &self.projection
    }

    /// Projected ring (same order as `vertices`)
    pub fn ring(&self) -> &[Point2] {
        &self.ring
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn area_m2(&self) -> f64 {
        self.area_m2
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Vertex centroid, averaging longitudes unwrapped against the first vertex
fn centroid(vertices: &[LatLng]) -> LatLng {
    let reference = vertices[0].lng;
    let n = vertices.len() as f64;
    let (sum_lat, sum_lng) = vertices.iter().fold((0.0, 0.0), |(lat, lng), v| {
        (lat + v.lat, lng + reference + normalize_longitude(v.lng - reference))
    });
    LatLng::new(sum_lat / n, normalize_longitude(sum_lng / n))
}

/// Absolute ring area in square meters
fn shoelace_area(ring: &[Point2]) -> f64 {
    let n = ring.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    (twice / 2.0).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_10m() -> Polygon {
        Polygon::from_local_meters(
            LatLng::new(0.0, 0.0),
            &[(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_longitude() {
        assert_eq!(normalize_longitude(0.0), 0.0);
        assert_eq!(normalize_longitude(180.0), -180.0);
        assert!((normalize_longitude(190.0) - -170.0).abs() < 1e-9);
        assert!((normalize_longitude(-190.0) - 170.0).abs() < 1e-9);
        assert!((normalize_longitude(540.0) - -180.0).abs() < 1e-9);
    }

    #[test]
    fn test_projection_roundtrip_near_origin() {
        let projection = LocalProjection::new(LatLng::new(64.1466, -21.9426));
        let p = LatLng::new(64.1470, -21.9400);
        let back = projection.unproject(projection.project(p));
        assert!((back.lat - p.lat).abs() < 1e-9);
        assert!((back.lng - p.lng).abs() < 1e-9);
    }

    #[test]
    fn test_square_area() {
        let polygon = square_10m();
        assert!((polygon.area_m2() - 100.0).abs() < 1e-3);
        assert_eq!(polygon.len(), 4);
    }

    #[test]
    fn test_rejects_two_vertices() {
        let err = Polygon::new(vec![LatLng::new(0.0, 0.0), LatLng::new(0.0, 1.0)]).unwrap_err();
        assert!(matches!(err, GeofenceError::InvalidPolygon { .. }));
    }

    #[test]
    fn test_rejects_single_vertex() {
        let err = Polygon::new(vec![LatLng::new(0.0, 0.0)]).unwrap_err();
        assert!(matches!(err, GeofenceError::InvalidPolygon { .. }));
    }

    #[test]
    fn test_rejects_collinear() {
        let err = Polygon::new(vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(0.0, 0.001),
            LatLng::new(0.0, 0.002),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("zero area"));
    }

    #[test]
    fn test_rejects_non_finite_vertex() {
        let err = Polygon::new(vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(f64::NAN, 0.001),
            LatLng::new(0.001, 0.002),
        ])
        .unwrap_err();
        assert!(matches!(err, GeofenceError::InvalidPolygon { .. }));
    }

    #[test]
    fn test_antimeridian_polygon_is_small() {
        // ~0.002 degree box straddling 180
        let polygon = Polygon::new(vec![
            LatLng::new(-16.001, 179.999),
            LatLng::new(-16.001, -179.999),
            LatLng::new(-15.999, -179.999),
            LatLng::new(-15.999, 179.999),
        ])
        .unwrap();

        // Roughly 214m x 222m, not a band around the globe
        assert!(polygon.area_m2() < 100_000.0);
        assert!(polygon.area_m2() > 10_000.0);
        assert!(polygon.projection().origin().lng.abs() > 179.9);
    }

    #[test]
    fn test_vertices_are_normalized() {
        let polygon = Polygon::new(vec![
            LatLng::new(0.0, 181.0),
            LatLng::new(0.001, 181.0),
            LatLng::new(0.001, 181.001),
        ])
        .unwrap();
        assert!((polygon.vertices()[0].lng - -179.0).abs() < 1e-9);
    }
}
