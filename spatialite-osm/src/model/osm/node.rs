use super::{Osmid, Tag};

/// an OSM `<node>`: a WGS84 coordinate with optional annotations.
#[derive(Debug, Clone, Default)]
pub struct OsmNode {
    pub id: Osmid,
    pub lat: f64,
    pub lon: f64,
    pub tags: Vec<Tag>,
}
