mod decoder;
mod node;
mod relation;
pub mod tag;
mod way;

pub use decoder::{validate_osm_prolog, EntityFilter, OsmDecoder, OsmEntity};
pub use node::OsmNode;
pub use relation::{Member, MemberKind, OsmRelation};
pub use tag::Tag;
pub use way::{NodeRef, OsmWay, ResolvedNode};

/// raw OpenStreetMap identifier (64-bit signed, shared by nodes, ways and
/// relations).
pub type Osmid = i64;
