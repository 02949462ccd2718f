use crate::model::osm::{NodeRef, Osmid};
use geo_types::Coord;

/// one node of a resolved road path: canonical endpoint id, shared-road
/// reference count and WGS84 coordinate (x = lon, y = lat).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathNode {
    pub alias: Osmid,
    pub refcount: i64,
    pub coord: Coord<f64>,
}

/// a candidate arc of the routing graph: canonical endpoints plus the
/// ordered point sequence between them.
#[derive(Debug, Clone, PartialEq)]
pub struct ArcPath {
    pub from: Osmid,
    pub to: Osmid,
    pub points: Vec<Coord<f64>>,
}

/// flattens a way's resolved refs into path nodes, discarding the second
/// of every consecutive coincident pair.
pub fn path_nodes(refs: &[NodeRef]) -> Vec<PathNode> {
    let mut nodes: Vec<PathNode> = Vec::with_capacity(refs.len());
    for r in refs {
        let resolved = match &r.resolved {
            Some(resolved) => resolved,
            None => continue,
        };
        let coord = Coord {
            x: resolved.lon,
            y: resolved.lat,
        };
        if let Some(prev) = nodes.last() {
            if prev.coord == coord {
                continue;
            }
        }
        nodes.push(PathNode {
            alias: resolved.alias,
            refcount: resolved.refcount,
            coord,
        });
    }
    nodes
}

/// splits a road path into arcs. an internal node shared by more than one
/// road (refcount > 1) ends the current arc and starts the next, with the
/// split coordinate on both sides. self-closed arcs are then bisected at
/// their midpoint index. degenerate arcs of fewer than two points are
/// dropped.
pub fn split_into_arcs(nodes: &[PathNode]) -> Vec<ArcPath> {
    if nodes.len() < 2 {
        return Vec::new();
    }
    let mut arcs: Vec<ArcPath> = Vec::new();
    let mut current = ArcPath {
        from: nodes[0].alias,
        to: nodes[0].alias,
        points: Vec::new(),
    };
    let last = nodes.len() - 1;
    for (i, n) in nodes.iter().enumerate() {
        if current.points.is_empty() {
            current.from = n.alias;
        }
        current.points.push(n.coord);
        current.to = n.alias;
        if i != 0 && i != last && n.refcount > 1 {
            let next = ArcPath {
                from: n.alias,
                to: n.alias,
                points: vec![n.coord],
            };
            arcs.push(std::mem::replace(&mut current, next));
        }
    }
    arcs.push(current);

    // bisect rings; halves are appended and re-examined in turn
    let mut i = 0;
    while i < arcs.len() {
        if is_ring(&arcs[i]) {
            let second = bisect_ring(&mut arcs[i], nodes);
            arcs.push(second);
        }
        i += 1;
    }
    arcs.retain(|a| a.points.len() >= 2);
    arcs
}

fn is_ring(arc: &ArcPath) -> bool {
    arc.points.len() > 1 && arc.points.first() == arc.points.last()
}

/// cuts a self-closed arc at its midpoint index. the split coordinate ends
/// the first half and starts the second, and its node id is recovered by a
/// linear scan over the path.
fn bisect_ring(arc: &mut ArcPath, nodes: &[PathNode]) -> ArcPath {
    let limit = arc.points.len() / 2;
    let midpoint = arc.points[limit];
    let node_id = find_node_by_coord(nodes, midpoint);
    let second = ArcPath {
        from: node_id,
        to: arc.to,
        points: arc.points[limit..].to_vec(),
    };
    arc.points.truncate(limit + 1);
    arc.to = node_id;
    second
}

/// alias of the first path node at exactly these coordinates, or 0 when
/// none matches.
pub fn find_node_by_coord(nodes: &[PathNode], coord: Coord<f64>) -> Osmid {
    nodes
        .iter()
        .find(|n| n.coord == coord)
        .map(|n| n.alias)
        .unwrap_or(0)
}
