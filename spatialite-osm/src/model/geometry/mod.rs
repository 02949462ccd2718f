pub mod blob;

use geo::{Geodesic, Length};
use geo_types::{LineString, MultiPolygon, Polygon};
use std::fmt::Display;

/// EPSG code for WGS84 geographic coordinates; every geometry this system
/// reads or writes lives in it.
pub const SRID_WGS84: i32 = 4326;

/// declared geometry type of an output column, as registered in
/// `geometry_columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryClass {
    Point,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
}

impl GeometryClass {
    pub fn as_sql(&self) -> &'static str {
        match self {
            GeometryClass::Point => "POINT",
            GeometryClass::LineString => "LINESTRING",
            GeometryClass::MultiLineString => "MULTILINESTRING",
            GeometryClass::Polygon => "POLYGON",
            GeometryClass::MultiPolygon => "MULTIPOLYGON",
        }
    }
}

impl Display for GeometryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// true iff the first and last coordinate are exactly equal. exact f64
/// comparison is intentional: closure only counts when the endpoints are
/// the very same staged coordinate.
pub fn is_closed(line: &LineString<f64>) -> bool {
    match (line.0.first(), line.0.last()) {
        (Some(a), Some(b)) => a.x == b.x && a.y == b.y,
        _ => false,
    }
}

/// wraps a closed linestring into a multipolygon with a single hole-free
/// polygon whose exterior ring is the linestring's vertex sequence.
pub fn closed_ring_to_multipolygon(line: &LineString<f64>) -> MultiPolygon<f64> {
    MultiPolygon(vec![Polygon::new(line.clone(), vec![])])
}

/// geodesic length in meters on the WGS84 ellipsoid
/// (a = 6378137.0, 1/f = 298.257223563). a spherical great-circle would
/// drift from these figures by ~0.5% and must not be substituted.
pub fn geodesic_length_m(line: &LineString<f64>) -> f64 {
    Geodesic.length(line)
}
