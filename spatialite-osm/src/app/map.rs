use crate::algorithm::classify;
use crate::config::MapBuildConfig;
use crate::db::layers::{self, LayerSet, LayerShape};
use crate::db::node_store::{NodeStore, StagingSchema};
use crate::db::way_store::WayStore;
use crate::db::Database;
use crate::model::geometry::{blob, closed_ring_to_multipolygon, is_closed};
use crate::model::osm::{
    tag, EntityFilter, Member, OsmDecoder, OsmEntity, OsmNode, OsmRelation, OsmWay,
};
use crate::model::BuildError;
use geo_types::{Coord, Geometry, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use kdam::{Bar, BarExt};

const PROGRESS_LINE_DELTA: u64 = 1000;

/// builds the thematic vector map: streams the XML once, staging nodes and
/// way geometries in temp tables while dispatching classified entities
/// into the per-layer output tables.
pub fn run(config: &MapBuildConfig) -> Result<(), BuildError> {
    let cache_size = if config.in_memory { 0 } else { config.cache_size };
    let db = Database::open(&config.db_path, cache_size, config.in_memory)?;
    layers::ensure_map_schema(&db)?;
    let node_store = NodeStore::create(&db, StagingSchema::Map)?;
    let way_store = WayStore::create(&db)?;
    let mut layer_set = LayerSet::new();

    db.begin()?;
    let mut decoder = OsmDecoder::open(&config.osm_path, EntityFilter::all())?;
    let mut progress = Bar::builder()
        .desc("parsing XML")
        .unit(" lines")
        .unit_scale(true)
        .build()
        .map_err(BuildError::Setup)?;
    let mut last_line = 0u64;
    let mut nodes = 0u64;
    let mut ways = 0u64;
    let mut relations = 0u64;
    while let Some(entity) = decoder.next_entity()? {
        let result = match entity {
            OsmEntity::Node(node) => {
                nodes += 1;
                eval_node(&db, &node_store, &mut layer_set, &node)
            }
            OsmEntity::Way(way) => {
                ways += 1;
                eval_way(&db, &node_store, &way_store, &mut layer_set, way)
            }
            OsmEntity::Relation(relation) => {
                relations += 1;
                eval_relation(&db, &way_store, &mut layer_set, relation)
            }
        };
        if let Err(e) = result {
            if e.is_entity_local() {
                eprintln!("{e}");
            } else {
                return Err(e);
            }
        }
        let line = decoder.line_number();
        if line - last_line >= PROGRESS_LINE_DELTA {
            last_line = line;
            let _ = progress.update_to(line as usize);
        }
    }
    eprintln!();
    log::info!("loaded {nodes} nodes, {ways} ways, {relations} relations");
    db.commit()?;

    node_store.drop_table(&db);
    way_store.drop_table(&db);
    if config.spatial_index {
        db.create_spatial_indexes()?;
    }
    db.finish()
}

fn eval_node(
    db: &Database,
    node_store: &NodeStore,
    layer_set: &mut LayerSet,
    node: &OsmNode,
) -> Result<(), BuildError> {
    node_store.stage(db, node)?;
    if node.tags.is_empty() {
        return Ok(());
    }
    let c = classify::classify(&node.tags);
    let geometry = blob::to_blob(&Geometry::Point(Point::new(node.lon, node.lat)))?;
    if let Some(layer) = c.layer {
        layer_set.insert_layer(
            db,
            LayerShape::Point,
            layer,
            node.id,
            c.sub_type,
            c.name,
            &geometry,
        )
    } else if c.name.is_some() {
        layer_set.insert_generic_point(db, node.id, c.name, &geometry)
    } else {
        let address = classify::address_fields(&node.tags);
        if address.is_empty() {
            Ok(())
        } else {
            layer_set.insert_address(db, node.id, &address, &geometry)
        }
    }
}

fn eval_way(
    db: &Database,
    node_store: &NodeStore,
    way_store: &WayStore,
    layer_set: &mut LayerSet,
    mut way: OsmWay,
) -> Result<(), BuildError> {
    if way.refs.is_empty() {
        return Ok(());
    }
    node_store.resolve(db, &mut way.refs)?;
    let line = LineString(
        way.refs
            .iter()
            .filter_map(|r| r.resolved.as_ref())
            .map(|n| Coord { x: n.lon, y: n.lat })
            .collect(),
    );

    let c = classify::classify(&way.tags);
    let mut area = tag::has_value(&way.tags, "area", "yes");
    if !area {
        // recover undeclared areas: a closed way of an areal layer
        if let Some(layer) = c.layer {
            area = classify::is_areal_layer(layer) && is_closed(&line);
        }
    }

    // the temp cache always stores the multilinestring rendition, so
    // relations composing over this way see plain line parts
    let line_geometry = blob::to_blob(&Geometry::MultiLineString(MultiLineString(vec![
        line.clone()
    ])))?;
    way_store.stage(db, way.id, area, &line_geometry)?;

    if way.tags.is_empty() {
        return Ok(());
    }
    if area {
        let polygon_geometry =
            blob::to_blob(&Geometry::MultiPolygon(closed_ring_to_multipolygon(&line)))?;
        match c.layer {
            Some(layer) => layer_set.insert_layer(
                db,
                LayerShape::Polygon,
                layer,
                way.id,
                c.sub_type,
                c.name,
                &polygon_geometry,
            ),
            None if c.name.is_some() => {
                layer_set.insert_generic_polygon(db, way.id, c.name, &polygon_geometry)
            }
            None => Ok(()),
        }
    } else {
        match c.layer {
            Some(layer) => layer_set.insert_layer(
                db,
                LayerShape::Line,
                layer,
                way.id,
                c.sub_type,
                c.name,
                &line_geometry,
            ),
            None if c.name.is_some() => {
                layer_set.insert_generic_line(db, way.id, c.name, &line_geometry)
            }
            None => Ok(()),
        }
    }
}

fn eval_relation(
    db: &Database,
    way_store: &WayStore,
    layer_set: &mut LayerSet,
    mut relation: OsmRelation,
) -> Result<(), BuildError> {
    if relation.tags.is_empty() {
        return Ok(());
    }
    let c = classify::classify(&relation.tags);
    if c.layer.is_none() && c.name.is_none() {
        return Ok(());
    }
    if relation.members.is_empty() {
        return Ok(());
    }

    if c.multipolygon {
        // ring-role admissibility comes before any lookup; a relation
        // violating it is dropped without a diagnostic
        let outers = relation
            .members
            .iter()
            .filter(|m| m.role == "outer")
            .count();
        let inners = relation
            .members
            .iter()
            .filter(|m| m.role == "inner")
            .count();
        if outers != 1 || inners + 1 != relation.members.len() {
            return Ok(());
        }
        way_store.resolve_members(db, &mut relation.members)?;
        let multipolygon = compose_multipolygon(relation.id, &relation.members)?;
        let geometry = blob::to_blob(&Geometry::MultiPolygon(multipolygon))?;
        match c.layer {
            Some(layer) => layer_set.insert_layer(
                db,
                LayerShape::Polygon,
                layer,
                relation.id,
                c.sub_type,
                c.name,
                &geometry,
            ),
            None => layer_set.insert_generic_polygon(db, relation.id, c.name, &geometry),
        }
    } else {
        way_store.resolve_members(db, &mut relation.members)?;
        let multiline = compose_multilinestring(&relation.members);
        let geometry = blob::to_blob(&Geometry::MultiLineString(multiline))?;
        match c.layer {
            Some(layer) => layer_set.insert_layer(
                db,
                LayerShape::Line,
                layer,
                relation.id,
                c.sub_type,
                c.name,
                &geometry,
            ),
            None => layer_set.insert_generic_line(db, relation.id, c.name, &geometry),
        }
    }
}

/// appends every component linestring of every member geometry, member
/// order preserved.
fn compose_multilinestring(members: &[Member]) -> MultiLineString<f64> {
    let lines = members
        .iter()
        .filter_map(|m| m.geom.as_ref())
        .flat_map(|g| g.0.iter().cloned())
        .collect();
    MultiLineString(lines)
}

/// assembles one polygon from the resolved members: the outer member's
/// first linestring becomes the exterior ring, each inner member's first
/// linestring the next interior ring. a missing or empty exterior rejects
/// the relation.
fn compose_multipolygon(
    relation_id: i64,
    members: &[Member],
) -> Result<MultiPolygon<f64>, BuildError> {
    let outer = members
        .iter()
        .find(|m| m.role == "outer")
        .and_then(|m| m.geom.as_ref())
        .and_then(|g| g.0.first());
    let exterior = match outer {
        Some(ls) if !ls.0.is_empty() => ls.clone(),
        _ => return Err(BuildError::IllegalMultipolygon(relation_id)),
    };
    let interiors = members
        .iter()
        .filter(|m| m.role == "inner")
        .map(|m| {
            m.geom
                .as_ref()
                .and_then(|g| g.0.first())
                .cloned()
                .unwrap_or_else(|| LineString::new(Vec::new()))
        })
        .collect();
    Ok(MultiPolygon(vec![Polygon::new(exterior, interiors)]))
}

#[cfg(test)]
mod tests {
    use crate::config::MapBuildConfig;
    use crate::model::geometry::blob;
    use geo_types::Geometry;
    use std::path::PathBuf;

    fn build_map(xml: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let osm_path = dir.path().join("input.osm");
        std::fs::write(&osm_path, xml).unwrap();
        let db_path = dir.path().join("map.sqlite");
        let config = MapBuildConfig {
            osm_path,
            db_path: db_path.clone(),
            cache_size: 0,
            in_memory: false,
            spatial_index: false,
        };
        super::run(&config).unwrap();
        (dir, db_path)
    }

    fn table_exists(conn: &rusqlite::Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT Count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |r| r.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn test_isolated_named_node_lands_in_pt_generic() {
        let (_dir, db_path) = build_map(
            r#"<?xml version="1.0"?>
<osm>
  <node id="1" lat="10.0" lon="20.0"><tag k="name" v="Foo"/></node>
</osm>"#,
        );
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let (id, name, geometry): (i64, String, Vec<u8>) = conn
            .query_row("SELECT id, name, Geometry FROM pt_generic", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(name, "Foo");
        match blob::from_blob(&geometry).unwrap() {
            Geometry::Point(p) => {
                assert_eq!(p.x(), 20.0);
                assert_eq!(p.y(), 10.0);
            }
            other => panic!("expected point, got {other:?}"),
        }
        // no layer tables were created for it
        assert!(!table_exists(&conn, "pt_highway"));
        assert!(!table_exists(&conn, "pt_amenity"));
        // temp tables are gone
        assert!(!table_exists(&conn, "osm_tmp_nodes"));
        assert!(!table_exists(&conn, "osm_tmp_ways"));
    }

    #[test]
    fn test_addressed_node_lands_in_pt_addresses() {
        let (_dir, db_path) = build_map(
            r#"<?xml version="1.0"?>
<osm>
  <node id="2" lat="41.9" lon="12.48">
    <tag k="addr:city" v="Rome"/>
    <tag k="addr:street" v="Via Lata"/>
    <tag k="addr:housenumber" v="12"/>
  </node>
</osm>"#,
        );
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let row: (Option<String>, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>) = conn
            .query_row(
                "SELECT country, city, postcode, street, housename, housenumber \
                 FROM pt_addresses WHERE id = 2",
                [],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                    ))
                },
            )
            .unwrap();
        assert_eq!(row.1.as_deref(), Some("Rome"));
        assert_eq!(row.3.as_deref(), Some("Via Lata"));
        assert_eq!(row.5.as_deref(), Some("12"));
        assert!(row.0.is_none());
        assert!(row.2.is_none());
        assert!(row.4.is_none());
    }

    const FOOTWAY_RING: &str = r#"<?xml version="1.0"?>
<osm>
  <node id="1" lat="0.0" lon="0.0"/>
  <node id="2" lat="0.0" lon="0.001"/>
  <node id="3" lat="0.001" lon="0.001"/>
  <way id="100">
    <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="1"/>
    <tag k="highway" v="footway"/>
  </way>
</osm>"#;

    #[test]
    fn test_closed_footway_is_a_linestring_layer_row() {
        // highway is not an areal layer, so closure alone does not make a
        // polygon out of it
        let (_dir, db_path) = build_map(FOOTWAY_RING);
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let (sub_type, geometry): (String, Vec<u8>) = conn
            .query_row("SELECT sub_type, Geometry FROM ln_highway WHERE id = 100", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(sub_type, "footway");
        match blob::from_blob(&geometry).unwrap() {
            Geometry::MultiLineString(mls) => {
                assert_eq!(mls.0.len(), 1);
                // one stored point per resolvable node-ref
                assert_eq!(mls.0[0].0.len(), 4);
            }
            other => panic!("expected multilinestring, got {other:?}"),
        }
        assert!(!table_exists(&conn, "pg_highway"));
    }

    #[test]
    fn test_area_yes_way_becomes_polygon() {
        let xml = FOOTWAY_RING.replace(
            "<tag k=\"highway\" v=\"footway\"/>",
            "<tag k=\"highway\" v=\"footway\"/><tag k=\"area\" v=\"yes\"/>",
        );
        let (_dir, db_path) = build_map(&xml);
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let geometry: Vec<u8> = conn
            .query_row("SELECT Geometry FROM pg_highway WHERE id = 100", [], |r| {
                r.get(0)
            })
            .unwrap();
        match blob::from_blob(&geometry).unwrap() {
            Geometry::MultiPolygon(mp) => {
                assert_eq!(mp.0.len(), 1);
                assert_eq!(mp.0[0].exterior().0.len(), 4);
            }
            other => panic!("expected multipolygon, got {other:?}"),
        }
        assert!(!table_exists(&conn, "ln_highway"));
    }

    #[test]
    fn test_closed_way_of_areal_layer_becomes_polygon() {
        let (_dir, db_path) = build_map(
            r#"<?xml version="1.0"?>
<osm>
  <node id="1" lat="0.0" lon="0.0"/>
  <node id="2" lat="0.0" lon="0.001"/>
  <node id="3" lat="0.001" lon="0.001"/>
  <way id="100">
    <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="1"/>
    <tag k="building" v="yes"/>
  </way>
</osm>"#,
        );
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT Count(*) FROM pg_building", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_way_with_unresolved_node_is_dropped() {
        let (_dir, db_path) = build_map(
            r#"<?xml version="1.0"?>
<osm>
  <node id="1" lat="0.0" lon="0.0"/>
  <way id="100">
    <nd ref="1"/><nd ref="999"/>
    <tag k="highway" v="primary"/>
  </way>
</osm>"#,
        );
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        assert!(!table_exists(&conn, "ln_highway"));
    }

    const MULTIPOLYGON_SAMPLE: &str = r#"<?xml version="1.0"?>
<osm>
  <node id="1" lat="0.0" lon="0.0"/>
  <node id="2" lat="0.0" lon="0.01"/>
  <node id="3" lat="0.01" lon="0.01"/>
  <node id="4" lat="0.01" lon="0.0"/>
  <node id="5" lat="0.002" lon="0.002"/>
  <node id="6" lat="0.002" lon="0.003"/>
  <node id="7" lat="0.003" lon="0.003"/>
  <node id="8" lat="0.006" lon="0.006"/>
  <node id="9" lat="0.006" lon="0.007"/>
  <node id="10" lat="0.007" lon="0.007"/>
  <way id="100"><nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="4"/><nd ref="1"/></way>
  <way id="101"><nd ref="5"/><nd ref="6"/><nd ref="7"/><nd ref="5"/></way>
  <way id="102"><nd ref="8"/><nd ref="9"/><nd ref="10"/><nd ref="8"/></way>
  <relation id="1000">
    <member type="way" ref="100" role="outer"/>
    <member type="way" ref="101" role="inner"/>
    <member type="way" ref="102" role="inner"/>
    <tag k="type" v="multipolygon"/>
    <tag k="landuse" v="forest"/>
  </relation>
</osm>"#;

    #[test]
    fn test_multipolygon_relation_composition() {
        let (_dir, db_path) = build_map(MULTIPOLYGON_SAMPLE);
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let (sub_type, geometry): (String, Vec<u8>) = conn
            .query_row(
                "SELECT sub_type, Geometry FROM pg_landuse WHERE id = 1000",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(sub_type, "forest");
        match blob::from_blob(&geometry).unwrap() {
            Geometry::MultiPolygon(mp) => {
                assert_eq!(mp.0.len(), 1);
                let polygon = &mp.0[0];
                // ring point counts match the member ways
                assert_eq!(polygon.exterior().0.len(), 5);
                assert_eq!(polygon.interiors().len(), 2);
                assert_eq!(polygon.interiors()[0].0.len(), 4);
                assert_eq!(polygon.interiors()[1].0.len(), 4);
            }
            other => panic!("expected multipolygon, got {other:?}"),
        }
    }

    #[test]
    fn test_multipolygon_with_two_outers_is_dropped_silently() {
        let xml = MULTIPOLYGON_SAMPLE.replace(
            "<member type=\"way\" ref=\"101\" role=\"inner\"/>",
            "<member type=\"way\" ref=\"101\" role=\"outer\"/>",
        );
        let (_dir, db_path) = build_map(&xml);
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        assert!(!table_exists(&conn, "pg_landuse"));
    }

    #[test]
    fn test_linear_relation_concatenates_member_lines() {
        let (_dir, db_path) = build_map(
            r#"<?xml version="1.0"?>
<osm>
  <node id="1" lat="0.0" lon="0.0"/>
  <node id="2" lat="0.0" lon="0.001"/>
  <node id="3" lat="0.001" lon="0.001"/>
  <node id="4" lat="0.002" lon="0.002"/>
  <way id="100"><nd ref="1"/><nd ref="2"/></way>
  <way id="101"><nd ref="3"/><nd ref="4"/></way>
  <relation id="1000">
    <member type="way" ref="100" role=""/>
    <member type="way" ref="101" role=""/>
    <tag k="route" v="hiking"/>
  </relation>
</osm>"#,
        );
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let geometry: Vec<u8> = conn
            .query_row("SELECT Geometry FROM ln_route WHERE id = 1000", [], |r| {
                r.get(0)
            })
            .unwrap();
        match blob::from_blob(&geometry).unwrap() {
            Geometry::MultiLineString(mls) => {
                assert_eq!(mls.0.len(), 2);
                assert_eq!(mls.0[0].0.len(), 2);
            }
            other => panic!("expected multilinestring, got {other:?}"),
        }
    }

    #[test]
    fn test_spatial_index_generation() {
        let dir = tempfile::tempdir().unwrap();
        let osm_path = dir.path().join("input.osm");
        std::fs::write(
            &osm_path,
            r#"<?xml version="1.0"?>
<osm><node id="1" lat="10.0" lon="20.0"><tag k="name" v="Foo"/></node></osm>"#,
        )
        .unwrap();
        let db_path = dir.path().join("map.sqlite");
        let config = MapBuildConfig {
            osm_path,
            db_path: db_path.clone(),
            cache_size: 0,
            in_memory: false,
            spatial_index: true,
        };
        super::run(&config).unwrap();
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT Count(*) FROM idx_pt_generic_Geometry", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
