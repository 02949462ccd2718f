use crate::algorithm::cost::{oneway_flags, road_class, road_name, traversal_cost_seconds};
use crate::algorithm::topology::{path_nodes, split_into_arcs};
use crate::config::NetBuildConfig;
use crate::db::arc_store::{ArcMode, ArcStore};
use crate::db::node_store::{NodeStore, StagingSchema};
use crate::db::Database;
use crate::model::geometry::geodesic_length_m;
use crate::model::osm::{
    validate_osm_prolog, EntityFilter, OsmDecoder, OsmEntity, OsmWay,
};
use crate::model::BuildError;
use geo_types::LineString;
use itertools::Itertools;
use kdam::{Bar, BarExt};

/// builds the routable road network: one streaming pass to stage nodes,
/// one to count road references, a coincident-node disambiguation step,
/// and one final pass splitting ways into arcs.
pub fn run(config: &NetBuildConfig) -> Result<(), BuildError> {
    validate_osm_prolog(&config.osm_path)?;
    let cache_size = if config.in_memory { 0 } else { config.cache_size };
    let db = Database::open(&config.db_path, cache_size, config.in_memory)?;
    let mode = if config.unidirectional {
        ArcMode::Unidirectional
    } else {
        ArcMode::Bidirectional
    };
    let node_store = NodeStore::create(&db, StagingSchema::Network)?;
    let arc_store = ArcStore::create(&db, &config.table, mode)?;

    let nodes = stage_nodes(config, &db, &node_store)?;
    log::info!("loaded {nodes} OSM nodes");

    let ways = count_references(config, &db, &node_store)?;
    log::info!("verified {ways} OSM ways");

    let duplicates = node_store.disambiguate(&db)?;
    if duplicates == 0 {
        log::info!("no duplicate OSM nodes found");
    } else {
        log::info!("found {duplicates} duplicate OSM nodes - fixed");
    }

    let arcs = extract_arcs(config, &db, &node_store, &arc_store)?;
    log::info!("loaded {arcs} network arcs");

    node_store.drop_table(&db);
    arc_store.drop_index(&db);
    db.finish()
}

/// pass 0: every `<node>` goes into the staging table with itself as
/// alias and a zero refcount.
fn stage_nodes(
    config: &NetBuildConfig,
    db: &Database,
    node_store: &NodeStore,
) -> Result<u64, BuildError> {
    let mut decoder = OsmDecoder::open(&config.osm_path, EntityFilter::nodes_only())?;
    let mut progress = progress_bar("loading OSM nodes")?;
    db.begin()?;
    let mut count = 0u64;
    while let Some(entity) = decoder.next_entity()? {
        if let OsmEntity::Node(node) = entity {
            node_store.stage(db, &node)?;
            count += 1;
            let _ = progress.update(1);
        }
    }
    db.commit()?;
    eprintln!();
    Ok(count)
}

/// pass 1: each admissible road way bumps the refcount of every distinct
/// staged node it references.
fn count_references(
    config: &NetBuildConfig,
    db: &Database,
    node_store: &NodeStore,
) -> Result<u64, BuildError> {
    let mut decoder = OsmDecoder::open(&config.osm_path, EntityFilter::ways_only())?;
    let mut progress = progress_bar("verifying OSM ways")?;
    db.begin()?;
    let mut count = 0u64;
    while let Some(entity) = decoder.next_entity()? {
        let mut way = match entity {
            OsmEntity::Way(way) => way,
            _ => continue,
        };
        if road_class(&way.tags).is_none() {
            continue;
        }
        match node_store.resolve(db, &mut way.refs) {
            Ok(()) => {
                let distinct = way.refs.iter().map(|r| r.node_id).unique();
                node_store.increment_refcounts(db, distinct)?;
                count += 1;
                let _ = progress.update(1);
            }
            Err(e) if e.is_entity_local() => eprintln!("{e}"),
            Err(e) => return Err(e),
        }
    }
    db.commit()?;
    eprintln!();
    Ok(count)
}

/// pass 2: full topology construction, splitting each admissible road way
/// into arcs and emitting one or two rows per arc depending on the mode.
fn extract_arcs(
    config: &NetBuildConfig,
    db: &Database,
    node_store: &NodeStore,
    arc_store: &ArcStore,
) -> Result<u64, BuildError> {
    let mut decoder = OsmDecoder::open(&config.osm_path, EntityFilter::ways_only())?;
    let mut progress = progress_bar("loading network arcs")?;
    db.begin()?;
    let mut count = 0u64;
    while let Some(entity) = decoder.next_entity()? {
        let way = match entity {
            OsmEntity::Way(way) => way,
            _ => continue,
        };
        match eval_road(db, node_store, arc_store, way) {
            Ok(inserted) => {
                count += inserted;
                if inserted > 0 {
                    let _ = progress.update(inserted as usize);
                }
            }
            Err(e) if e.is_entity_local() => eprintln!("{e}"),
            Err(e) => return Err(e),
        }
    }
    db.commit()?;
    eprintln!();
    Ok(count)
}

fn eval_road(
    db: &Database,
    node_store: &NodeStore,
    arc_store: &ArcStore,
    mut way: OsmWay,
) -> Result<u64, BuildError> {
    let class = match road_class(&way.tags) {
        Some(class) => class.to_string(),
        None => return Ok(0),
    };
    if way.refs.is_empty() {
        return Ok(0);
    }
    node_store.resolve(db, &mut way.refs)?;
    let nodes = path_nodes(&way.refs);
    let arcs = split_into_arcs(&nodes);
    if arcs.is_empty() {
        return Ok(0);
    }
    let name = road_name(&way.tags);
    let oneway = oneway_flags(&way.tags);
    let mut inserted = 0u64;
    for arc in &arcs {
        let line = LineString(arc.points.clone());
        let length = geodesic_length_m(&line);
        let cost = traversal_cost_seconds(&class, length);
        inserted += arc_store.insert(
            db, way.id, &class, name, oneway, arc.from, arc.to, &arc.points, length, cost,
        )? as u64;
    }
    Ok(inserted)
}

fn progress_bar(desc: &str) -> Result<Bar, BuildError> {
    Bar::builder()
        .desc(desc)
        .unit(" rows")
        .unit_scale(true)
        .build()
        .map_err(BuildError::Setup)
}
