//! # Geometry Kernel
//!
//! Pure geometric primitives used by the geofence evaluator and the segment
//! tracker. Coordinates are WGS84 [`GpsPoint`]s; internally they are mapped to
//! `geo` types with `x = longitude`, `y = latitude`.
//!
//! ## Conventions
//!
//! - A point on a polygon's boundary counts as **inside**.
//! - [`distance_to_polygon`] is the great-circle distance from the point to
//!   the closest point of the boundary ring. The closest point is searched in
//!   a plane where longitude is scaled by `cos(latitude)` of the query point,
//!   so east-west and north-south offsets compare in the same units; the
//!   final distance is measured with [`haversine_distance`].
//! - Polygons are validated once: trivially unclosed or duplicated vertices are
//!   repaired, self-intersecting rings are always rejected.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, Closest, ClosestPoint, Coord, Distance, Haversine, Intersects, Line, LineString, Point};
use rstar::AABB;
use serde::Serialize;
use thiserror::Error;

use crate::GpsPoint;

/// Degree to meter approximation used for envelopes and buffers.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Minimum number of distinct vertices in a polygon ring.
pub const MIN_POLYGON_VERTICES: usize = 3;

/// Reasons a boundary ring is refused.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GeometryError {
    #[error("polygon has {count} distinct vertices, minimum {minimum} required")]
    TooFewVertices { count: usize, minimum: usize },

    #[error("vertex {index} is not a valid WGS84 coordinate")]
    InvalidVertex { index: usize },

    #[error("polygon ring has zero area")]
    ZeroArea,

    #[error("polygon edges {first} and {second} intersect")]
    SelfIntersecting { first: usize, second: usize },
}

/// A validated, simple polygon.
///
/// The ring is stored open (first vertex not repeated); the `geo` polygon
/// closes it implicitly.
#[derive(Debug, Clone)]
pub struct Polygon {
    ring: Vec<GpsPoint>,
    shape: geo::Polygon<f64>,
}

impl Polygon {
    /// The open ring of distinct vertices.
    pub fn vertices(&self) -> &[GpsPoint] {
        &self.ring
    }

    pub fn as_geo(&self) -> &geo::Polygon<f64> {
        &self.shape
    }

    /// Bounding box `(min_lat, max_lat, min_lng, max_lng)`.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.ring.iter().fold(
            (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
            |(min_lat, max_lat, min_lng, max_lng), p| {
                (
                    min_lat.min(p.latitude),
                    max_lat.max(p.latitude),
                    min_lng.min(p.longitude),
                    max_lng.max(p.longitude),
                )
            },
        )
    }
}

fn to_coord(p: &GpsPoint) -> Coord<f64> {
    Coord {
        x: p.longitude,
        y: p.latitude,
    }
}

fn to_point(p: &GpsPoint) -> Point<f64> {
    Point::new(p.longitude, p.latitude)
}

/// Validate a boundary ring and build a [`Polygon`].
///
/// Repairs only what cannot change enforcement semantics: a closing vertex
/// equal to the first, and consecutive duplicate vertices.
pub fn validate_polygon(coords: &[GpsPoint]) -> Result<Polygon, GeometryError> {
    if let Some(index) = coords.iter().position(|p| !p.is_valid()) {
        return Err(GeometryError::InvalidVertex { index });
    }

    let mut ring: Vec<GpsPoint> = Vec::with_capacity(coords.len());
    for p in coords {
        if ring.last() != Some(p) {
            ring.push(*p);
        }
    }
    while ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }

    if ring.len() < MIN_POLYGON_VERTICES {
        return Err(GeometryError::TooFewVertices {
            count: ring.len(),
            minimum: MIN_POLYGON_VERTICES,
        });
    }

    let exterior = LineString::new(ring.iter().map(to_coord).collect());
    let shape = geo::Polygon::new(exterior, vec![]);

    if shape.unsigned_area() <= f64::EPSILON * f64::EPSILON {
        return Err(GeometryError::ZeroArea);
    }

    check_simple(&ring)?;

    Ok(Polygon { ring, shape })
}

/// Reject rings whose edges cross or overlap.
fn check_simple(ring: &[GpsPoint]) -> Result<(), GeometryError> {
    let n = ring.len();
    let edges: Vec<Line<f64>> = (0..n)
        .map(|i| Line::new(to_coord(&ring[i]), to_coord(&ring[(i + 1) % n])))
        .collect();

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(edges[i], edges[j]) {
                None => {}
                // Neighbouring edges share exactly one vertex
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(_) => {
                    return Err(GeometryError::SelfIntersecting {
                        first: i,
                        second: j,
                    });
                }
            }
        }
    }
    Ok(())
}

/// True when `point` lies inside `polygon` or on its boundary.
pub fn point_in_polygon(point: &GpsPoint, polygon: &Polygon) -> bool {
    polygon.shape.intersects(&to_point(point))
}

/// Distance in meters from `point` to `polygon`; 0 when inside.
pub fn distance_to_polygon(point: &GpsPoint, polygon: &Polygon) -> f64 {
    if point_in_polygon(point, polygon) {
        return 0.0;
    }

    // Local equirectangular plane around the query point
    let scale = point.latitude.to_radians().cos().max(1e-6);
    let projected: LineString<f64> = polygon
        .shape
        .exterior()
        .coords()
        .map(|c| Coord {
            x: c.x * scale,
            y: c.y,
        })
        .collect();
    let query = Point::new(point.longitude * scale, point.latitude);
    let nearest = match projected.closest_point(&query) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => p,
        // Only possible for an empty ring, which validation rules out
        Closest::Indeterminate => return f64::INFINITY,
    };

    Haversine::distance(to_point(point), Point::new(nearest.x() / scale, nearest.y()))
}

/// Great-circle distance between two GPS points in meters.
pub fn haversine_distance(a: &GpsPoint, b: &GpsPoint) -> f64 {
    Haversine::distance(to_point(a), to_point(b))
}

/// Bounding box of `polygon` grown by `meters` on every side, in
/// `[lng, lat]` order for the R-tree.
pub fn buffered_envelope(polygon: &Polygon, meters: f64) -> AABB<[f64; 2]> {
    let (min_lat, max_lat, min_lng, max_lng) = polygon.bounds();
    let lat_pad = meters / METERS_PER_DEGREE;
    let widest_lat = min_lat.abs().max(max_lat.abs()).min(89.0);
    let lng_pad = meters / (METERS_PER_DEGREE * widest_lat.to_radians().cos());

    AABB::from_corners(
        [min_lng - lng_pad, min_lat - lat_pad],
        [max_lng + lng_pad, max_lat + lat_pad],
    )
}
