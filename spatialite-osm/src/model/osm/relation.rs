use super::{Osmid, Tag};
use geo_types::MultiLineString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Node,
    Way,
    Other,
}

impl MemberKind {
    pub fn from_type_attr(value: &str) -> MemberKind {
        match value {
            "node" => MemberKind::Node,
            "way" => MemberKind::Way,
            _ => MemberKind::Other,
        }
    }
}

/// a relation's reference to another entity. member geometries are pulled
/// from the temp-ways cache during relation composition; every member is
/// looked up there regardless of kind, so a node member simply fails to
/// resolve and rejects its relation.
#[derive(Debug, Clone)]
pub struct Member {
    pub kind: MemberKind,
    pub ref_id: Osmid,
    pub role: String,
    pub geom: Option<MultiLineString<f64>>,
}

impl Member {
    pub fn new(kind: MemberKind, ref_id: Osmid, role: String) -> Member {
        Member {
            kind,
            ref_id,
            role,
            geom: None,
        }
    }
}

/// an OSM `<relation>`: an ordered member list plus annotations.
#[derive(Debug, Clone, Default)]
pub struct OsmRelation {
    pub id: Osmid,
    pub members: Vec<Member>,
    pub tags: Vec<Tag>,
}
