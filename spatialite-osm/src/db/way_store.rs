use super::node_store::LOOKUP_BATCH_SIZE;
use super::Database;
use crate::model::geometry::{blob, GeometryClass};
use crate::model::osm::{Member, Osmid};
use crate::model::BuildError;
use geo_types::{Geometry, MultiLineString};
use rusqlite::params;
use std::cell::Cell;

/// cache of every way's resolved geometry, keyed by OSM id. relations pull
/// their member geometries back out of here instead of re-resolving the
/// member ways' node lists.
pub struct WayStore {
    broken: Cell<bool>,
}

impl WayStore {
    pub fn create(db: &Database) -> Result<WayStore, BuildError> {
        db.execute_ddl(
            "osm_tmp_ways",
            "CREATE TABLE osm_tmp_ways (\n\
             id INTEGER NOT NULL PRIMARY KEY,\n\
             area INTEGER NOT NULL)",
        )?;
        db.add_geometry_column("osm_tmp_ways", "Geometry", GeometryClass::MultiLineString)?;
        Ok(WayStore {
            broken: Cell::new(false),
        })
    }

    /// caches one way's multilinestring blob together with its areal flag.
    pub fn stage(&self, db: &Database, id: Osmid, area: bool, geometry: &[u8]) -> Result<(), BuildError> {
        if self.broken.get() {
            return Ok(());
        }
        let result = db
            .conn()
            .prepare_cached("INSERT INTO osm_tmp_ways (id, area, Geometry) VALUES (?1, ?2, ?3)")?
            .execute(params![id, area as i64, geometry]);
        if let Err(e) = result {
            eprintln!("{}", BuildError::Step(e.to_string()));
            self.broken.set(true);
        }
        Ok(())
    }

    /// fetches and decodes the stored geometry of every member, in blocks
    /// of 128 ids. all members take part in the lookup regardless of kind,
    /// so a node member can never resolve and rejects the relation. the
    /// first member left without a geometry fails with `UNRESOLVED-WAY`.
    pub fn resolve_members(&self, db: &Database, members: &mut [Member]) -> Result<(), BuildError> {
        let total = members.len();
        let mut base = 0;
        while base < total {
            let how_many = LOOKUP_BATCH_SIZE.min(total - base);
            let ids: Vec<Osmid> = members[base..base + how_many]
                .iter()
                .map(|m| m.ref_id)
                .collect();
            let sql = format!(
                "SELECT id, Geometry FROM osm_tmp_ways WHERE id IN ({})",
                super::node_store::placeholders(how_many)
            );
            let mut stmt = db.conn().prepare_cached(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(ids.iter()))?;
            while let Some(row) = rows.next()? {
                let id: Osmid = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                let geom = match blob::from_blob(&bytes) {
                    Ok(Geometry::MultiLineString(mls)) => mls,
                    Ok(Geometry::LineString(ls)) => MultiLineString(vec![ls]),
                    Ok(_) => continue,
                    Err(e) => {
                        log::warn!("discarding undecodable geometry for way {id}: {e}");
                        continue;
                    }
                };
                for m in members.iter_mut().filter(|m| m.ref_id == id) {
                    m.geom = Some(geom.clone());
                }
            }
            base += how_many;
        }
        if let Some(missing) = members.iter().find(|m| m.geom.is_none()) {
            return Err(BuildError::UnresolvedWay(missing.ref_id));
        }
        Ok(())
    }

    /// deregisters the geometry column and drops the cache table.
    pub fn drop_table(&self, db: &Database) {
        log::info!("dropping temporary table 'osm_tmp_ways'");
        if let Err(e) = db.discard_geometry_column("osm_tmp_ways") {
            eprintln!("dropping Geometry from 'osm_tmp_ways' error: {e}");
        }
        if let Err(e) = db.conn().execute_batch("DROP TABLE osm_tmp_ways") {
            eprintln!("'DROP TABLE osm_tmp_ways' error: {e}");
        }
    }
}
