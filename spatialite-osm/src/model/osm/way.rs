use super::{Osmid, Tag};

/// coordinates and graph attributes stamped onto a [`NodeRef`] by the
/// staged-node lookup. in the map schema `alias == node id` and
/// `refcount == 0`; the network schema carries the real values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedNode {
    pub lat: f64,
    pub lon: f64,
    pub alias: Osmid,
    pub refcount: i64,
}

/// a way's reference to a node; resolution against the staged node table
/// fills in `resolved`.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub node_id: Osmid,
    pub resolved: Option<ResolvedNode>,
}

impl NodeRef {
    pub fn new(node_id: Osmid) -> NodeRef {
        NodeRef {
            node_id,
            resolved: None,
        }
    }
}

/// an OSM `<way>`: an ordered node-reference list plus annotations.
#[derive(Debug, Clone, Default)]
pub struct OsmWay {
    pub id: Osmid,
    pub refs: Vec<NodeRef>,
    pub tags: Vec<Tag>,
}
