use super::SRID_WGS84;
use crate::model::BuildError;
use geo_types::Geometry;
use geozero::wkb::Ewkb;
use geozero::{CoordDimensions, ToGeo, ToWkb};

/// encodes a geometry into the blob format stored in geometry columns
/// (extended WKB carrying the 4326 SRID). the concrete geo-types variant
/// written here is what decodes back out, so callers wrap single parts
/// into the multi-variant their table declares.
pub fn to_blob(geom: &Geometry<f64>) -> Result<Vec<u8>, BuildError> {
    geom.to_ewkb(CoordDimensions::xy(), Some(SRID_WGS84))
        .map_err(|e| BuildError::Geometry(format!("unable to encode geometry: {e}")))
}

/// decodes a geometry blob previously produced by [`to_blob`].
pub fn from_blob(blob: &[u8]) -> Result<Geometry<f64>, BuildError> {
    Ewkb(blob.to_vec())
        .to_geo()
        .map_err(|e| BuildError::Geometry(format!("unable to decode geometry: {e}")))
}

#[cfg(test)]
mod tests {
    use super::{from_blob, to_blob};
    use geo_types::{Geometry, LineString, MultiLineString, Point};

    #[test]
    fn test_point_round_trip() {
        let geom = Geometry::Point(Point::new(20.0, 10.0));
        let blob = to_blob(&geom).unwrap();
        match from_blob(&blob).unwrap() {
            Geometry::Point(p) => {
                assert_eq!(p.x(), 20.0);
                assert_eq!(p.y(), 10.0);
            }
            other => panic!("expected point, got {other:?}"),
        }
    }

    #[test]
    fn test_declared_type_survives_the_codec() {
        // a single-line way is stored as a one-component multilinestring so
        // the decoded value matches the table's declared type
        let line = LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]);
        let geom = Geometry::MultiLineString(MultiLineString(vec![line]));
        let blob = to_blob(&geom).unwrap();
        match from_blob(&blob).unwrap() {
            Geometry::MultiLineString(mls) => {
                assert_eq!(mls.0.len(), 1);
                assert_eq!(mls.0[0].0.len(), 2);
            }
            other => panic!("expected multilinestring, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_blob_is_rejected() {
        assert!(from_blob(&[0x00, 0x01, 0x02]).is_err());
    }
}
