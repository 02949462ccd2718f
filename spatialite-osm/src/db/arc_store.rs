use super::Database;
use crate::algorithm::cost::OnewayFlags;
use crate::model::geometry::{blob, GeometryClass};
use crate::model::osm::Osmid;
use crate::model::BuildError;
use geo_types::{Coord, Geometry, LineString};
use rusqlite::params;
use std::cell::Cell;

/// arc emission mode. bidirectional keeps one row per arc with the two
/// oneway flags; unidirectional doubles bidirectional arcs into a natural
/// and a reversed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcMode {
    Bidirectional,
    Unidirectional,
}

/// sink for the user-named arcs table of the road network schema.
pub struct ArcStore {
    table: String,
    mode: ArcMode,
    broken: Cell<bool>,
}

impl ArcStore {
    /// creates the arcs table, its geometry column and the `from_to`
    /// unique index that deduplicates repeated arcs at insert time.
    pub fn create(db: &Database, table: &str, mode: ArcMode) -> Result<ArcStore, BuildError> {
        if table.contains('"') {
            return Err(BuildError::Configuration(format!(
                "invalid table name: {table}"
            )));
        }
        let ddl = match mode {
            ArcMode::Unidirectional => format!(
                "CREATE TABLE \"{table}\" (\n\
                 id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,\n\
                 osm_id INTEGER NOT NULL,\n\
                 class TEXT NOT NULL,\n\
                 node_from INTEGER NOT NULL,\n\
                 node_to INTEGER NOT NULL,\n\
                 name TEXT NOT NULL,\n\
                 length DOUBLE NOT NULL,\n\
                 cost DOUBLE NOT NULL)"
            ),
            ArcMode::Bidirectional => format!(
                "CREATE TABLE \"{table}\" (\n\
                 id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,\n\
                 osm_id INTEGER NOT NULL,\n\
                 class TEXT NOT NULL,\n\
                 node_from INTEGER NOT NULL,\n\
                 node_to INTEGER NOT NULL,\n\
                 name TEXT NOT NULL,\n\
                 oneway_fromto INTEGER NOT NULL,\n\
                 oneway_tofrom INTEGER NOT NULL,\n\
                 length DOUBLE NOT NULL,\n\
                 cost DOUBLE NOT NULL)"
            ),
        };
        db.execute_ddl(table, &ddl)?;
        db.add_geometry_column(table, "geometry", GeometryClass::LineString)?;
        db.conn().execute_batch(&format!(
            "CREATE UNIQUE INDEX from_to ON \"{table}\" (node_from, node_to, length, cost)"
        ))?;
        Ok(ArcStore {
            table: table.to_string(),
            mode,
            broken: Cell::new(false),
        })
    }

    /// writes one arc. returns how many rows were actually inserted (an
    /// arc repeating an existing (from, to, length, cost) tuple is
    /// absorbed by the unique index).
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        db: &Database,
        way_id: Osmid,
        class: &str,
        name: &str,
        oneway: OnewayFlags,
        from: Osmid,
        to: Osmid,
        points: &[Coord<f64>],
        length: f64,
        cost: f64,
    ) -> Result<usize, BuildError> {
        if self.broken.get() {
            return Ok(0);
        }
        match self.mode {
            ArcMode::Bidirectional => {
                let (fromto, tofrom) = if oneway.oneway {
                    if oneway.reverse {
                        (0i64, 1i64)
                    } else {
                        (1, 0)
                    }
                } else {
                    (1, 1)
                };
                let geometry = line_blob(points)?;
                self.step(db, params![
                    way_id, class, from, to, name, fromto, tofrom, length, cost, geometry
                ])
            }
            ArcMode::Unidirectional => {
                let mut count = 0;
                let straight = !oneway.oneway || !oneway.reverse;
                let reverse = !oneway.oneway || oneway.reverse;
                if straight {
                    let geometry = line_blob(points)?;
                    count += self.step(db, params![
                        way_id, class, from, to, name, length, cost, geometry
                    ])?;
                }
                if reverse && !self.broken.get() {
                    let reversed: Vec<Coord<f64>> = points.iter().rev().copied().collect();
                    let geometry = line_blob(&reversed)?;
                    count += self.step(db, params![
                        way_id, class, to, from, name, length, cost, geometry
                    ])?;
                }
                Ok(count)
            }
        }
    }

    fn step(&self, db: &Database, values: &[&dyn rusqlite::ToSql]) -> Result<usize, BuildError> {
        let sql = match self.mode {
            ArcMode::Bidirectional => format!(
                "INSERT OR IGNORE INTO \"{}\" \
                 (id, osm_id, class, node_from, node_to, name, oneway_fromto, oneway_tofrom, \
                 length, cost, geometry) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                self.table
            ),
            ArcMode::Unidirectional => format!(
                "INSERT OR IGNORE INTO \"{}\" \
                 (id, osm_id, class, node_from, node_to, name, length, cost, geometry) \
                 VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                self.table
            ),
        };
        match db.conn().prepare_cached(&sql)?.execute(values) {
            Ok(rows) => Ok(rows),
            Err(e) => {
                eprintln!("{}", BuildError::Step(e.to_string()));
                self.broken.set(true);
                Ok(0)
            }
        }
    }

    /// drops the `from_to` load-time index at end-of-run.
    pub fn drop_index(&self, db: &Database) {
        log::info!("dropping index 'from_to'");
        if let Err(e) = db.conn().execute_batch("DROP INDEX from_to") {
            eprintln!("'DROP INDEX from_to' error: {e}");
        }
    }
}

fn line_blob(points: &[Coord<f64>]) -> Result<Vec<u8>, BuildError> {
    blob::to_blob(&Geometry::LineString(LineString(points.to_vec())))
}
