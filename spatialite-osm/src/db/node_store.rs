use super::Database;
use crate::model::osm::{NodeRef, OsmNode, Osmid, ResolvedNode};
use crate::model::BuildError;
use rusqlite::params;
use std::cell::Cell;

/// node lookups are blocked into `IN (?, ...)` batches of this many ids;
/// the placeholder count varies per batch, so each size gets its own
/// cached prepared statement.
pub const LOOKUP_BATCH_SIZE: usize = 128;

/// shape of the staged node table. the map pipeline only needs raw
/// coordinates; the network pipeline adds the alias and reference count
/// used for topology construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingSchema {
    Map,
    Network,
}

/// external index over every `<node>` seen so far, keyed by OSM id. the
/// full node set does not fit in primary memory, so ways are resolved
/// through batched lookups against this table instead.
pub struct NodeStore {
    schema: StagingSchema,
    broken: Cell<bool>,
}

impl NodeStore {
    pub fn create(db: &Database, schema: StagingSchema) -> Result<NodeStore, BuildError> {
        let ddl = match schema {
            StagingSchema::Map => {
                "CREATE TABLE osm_tmp_nodes (\n\
                 id INTEGER NOT NULL PRIMARY KEY,\n\
                 lat DOUBLE NOT NULL,\n\
                 lon DOUBLE NOT NULL)"
            }
            StagingSchema::Network => {
                "CREATE TABLE osm_tmp_nodes (\n\
                 id INTEGER NOT NULL PRIMARY KEY,\n\
                 alias INTEGER NOT NULL,\n\
                 lat DOUBLE NOT NULL,\n\
                 lon DOUBLE NOT NULL,\n\
                 refcount INTEGER NOT NULL)"
            }
        };
        db.execute_ddl("osm_tmp_nodes", ddl)?;
        Ok(NodeStore {
            schema,
            broken: Cell::new(false),
        })
    }

    /// stages one node. a failed insert is reported once with the step
    /// token; subsequent rows are then dropped silently, as the original
    /// importer does after nulling its statement.
    pub fn stage(&self, db: &Database, node: &OsmNode) -> Result<(), BuildError> {
        if self.broken.get() {
            return Ok(());
        }
        let result = match self.schema {
            StagingSchema::Map => db
                .conn()
                .prepare_cached("INSERT INTO osm_tmp_nodes (id, lat, lon) VALUES (?1, ?2, ?3)")?
                .execute(params![node.id, node.lat, node.lon]),
            StagingSchema::Network => db
                .conn()
                .prepare_cached(
                    "INSERT INTO osm_tmp_nodes (id, alias, lat, lon, refcount) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![node.id, node.id, node.lat, node.lon, 0i64]),
        };
        if let Err(e) = result {
            eprintln!("{}", BuildError::Step(e.to_string()));
            self.broken.set(true);
        }
        Ok(())
    }

    /// stamps every ref whose id is present in the staged table with its
    /// coordinates (plus alias/refcount in the network schema). when one
    /// id matches several returned rows the last row wins. any ref still
    /// unresolved afterwards fails the owning way.
    pub fn resolve(&self, db: &Database, refs: &mut [NodeRef]) -> Result<(), BuildError> {
        let total = refs.len();
        let mut base = 0;
        while base < total {
            let how_many = LOOKUP_BATCH_SIZE.min(total - base);
            let ids: Vec<Osmid> = refs[base..base + how_many]
                .iter()
                .map(|r| r.node_id)
                .collect();
            let sql = match self.schema {
                StagingSchema::Map => format!(
                    "SELECT id, lat, lon FROM osm_tmp_nodes WHERE id IN ({})",
                    placeholders(how_many)
                ),
                StagingSchema::Network => format!(
                    "SELECT id, alias, lat, lon, refcount FROM osm_tmp_nodes WHERE id IN ({})",
                    placeholders(how_many)
                ),
            };
            let mut stmt = db.conn().prepare_cached(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(ids.iter()))?;
            while let Some(row) = rows.next()? {
                let id: Osmid = row.get(0)?;
                let resolved = match self.schema {
                    StagingSchema::Map => ResolvedNode {
                        lat: row.get(1)?,
                        lon: row.get(2)?,
                        alias: id,
                        refcount: 0,
                    },
                    StagingSchema::Network => ResolvedNode {
                        alias: row.get(1)?,
                        lat: row.get(2)?,
                        lon: row.get(3)?,
                        refcount: row.get(4)?,
                    },
                };
                for r in refs.iter_mut().filter(|r| r.node_id == id) {
                    r.resolved = Some(resolved);
                }
            }
            base += how_many;
        }
        if let Some(missing) = refs.iter().find(|r| r.resolved.is_none()) {
            return Err(BuildError::UnresolvedNode(missing.node_id));
        }
        Ok(())
    }

    /// bumps `refcount` by one for each given id. row-level failures are
    /// reported and skipped.
    pub fn increment_refcounts<I>(&self, db: &Database, ids: I) -> Result<(), BuildError>
    where
        I: IntoIterator<Item = Osmid>,
    {
        let mut stmt = db
            .conn()
            .prepare_cached("UPDATE osm_tmp_nodes SET refcount = refcount + 1 WHERE id = ?1")?;
        for id in ids {
            if let Err(e) = stmt.execute(params![id]) {
                eprintln!("{}", BuildError::Step(e.to_string()));
            }
        }
        Ok(())
    }

    /// merges nodes sharing identical coordinates: within each (lat, lon)
    /// group that has more than one referenced row, the lowest id becomes
    /// the canonical alias and every member is stamped with the group's
    /// summed refcount. returns how many rows were rewritten.
    pub fn disambiguate(&self, db: &Database) -> Result<usize, BuildError> {
        db.conn()
            .execute_batch("CREATE INDEX latlon ON osm_tmp_nodes (lat, lon)")?;
        let mut stmt = db.conn().prepare(
            "SELECT lat, lon, Sum(refcount) FROM osm_tmp_nodes \
             WHERE refcount > 0 GROUP BY lat, lon HAVING Count(*) > 1",
        )?;
        let groups = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        db.begin()?;
        let mut count = 0;
        for (lat, lon, refcount) in groups {
            let mut id_stmt = db
                .conn()
                .prepare_cached("SELECT id FROM osm_tmp_nodes WHERE lat = ?1 AND lon = ?2 ORDER BY id")?;
            let ids = id_stmt
                .query_map(params![lat, lon], |row| row.get::<_, Osmid>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let canonical = match ids.first() {
                Some(id) => *id,
                None => continue,
            };
            let mut update = db
                .conn()
                .prepare_cached("UPDATE osm_tmp_nodes SET alias = ?1, refcount = ?2 WHERE id = ?3")?;
            for id in &ids {
                match update.execute(params![canonical, refcount, id]) {
                    Ok(_) => count += 1,
                    Err(e) => eprintln!("{}", BuildError::Step(e.to_string())),
                }
            }
        }
        db.commit()?;
        Ok(count)
    }

    /// drops the staging table at end-of-run. failures are reported and
    /// swallowed so cleanup never aborts a completed build.
    pub fn drop_table(&self, db: &Database) {
        log::info!("dropping temporary table 'osm_tmp_nodes'");
        if let Err(e) = db.conn().execute_batch("DROP TABLE osm_tmp_nodes") {
            eprintln!("'DROP TABLE osm_tmp_nodes' error: {e}");
        }
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    let mut sql = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            sql.push(',');
        }
        sql.push('?');
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::{placeholders, NodeStore, StagingSchema};
    use crate::db::Database;
    use crate::model::osm::{NodeRef, OsmNode};
    use crate::model::BuildError;

    fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.sqlite"), 0, false).unwrap();
        (dir, db)
    }

    fn node(id: i64, lat: f64, lon: f64) -> OsmNode {
        OsmNode {
            id,
            lat,
            lon,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?,?,?");
    }

    #[test]
    fn test_stage_and_resolve_map_schema() {
        let (_dir, db) = temp_db();
        let store = NodeStore::create(&db, StagingSchema::Map).unwrap();
        store.stage(&db, &node(1, 10.0, 20.0)).unwrap();
        store.stage(&db, &node(2, 11.0, 21.0)).unwrap();

        let mut refs = vec![NodeRef::new(1), NodeRef::new(2), NodeRef::new(1)];
        store.resolve(&db, &mut refs).unwrap();
        let r0 = refs[0].resolved.unwrap();
        assert_eq!(r0.lat, 10.0);
        assert_eq!(r0.lon, 20.0);
        assert_eq!(r0.alias, 1);
        assert_eq!(r0.refcount, 0);
        // duplicate refs are stamped too
        assert_eq!(refs[2].resolved.unwrap().lat, 10.0);
    }

    #[test]
    fn test_resolve_reports_first_missing_ref() {
        let (_dir, db) = temp_db();
        let store = NodeStore::create(&db, StagingSchema::Map).unwrap();
        store.stage(&db, &node(1, 10.0, 20.0)).unwrap();
        let mut refs = vec![NodeRef::new(1), NodeRef::new(99)];
        match store.resolve(&db, &mut refs) {
            Err(BuildError::UnresolvedNode(99)) => {}
            other => panic!("expected UNRESOLVED-NODE 99, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_across_batch_boundary() {
        let (_dir, db) = temp_db();
        let store = NodeStore::create(&db, StagingSchema::Network).unwrap();
        db.begin().unwrap();
        for id in 1..=300 {
            store.stage(&db, &node(id, id as f64 * 0.001, 0.0)).unwrap();
        }
        db.commit().unwrap();
        let mut refs: Vec<NodeRef> = (1..=300).map(NodeRef::new).collect();
        store.resolve(&db, &mut refs).unwrap();
        assert!(refs.iter().all(|r| r.resolved.is_some()));
        assert_eq!(refs[299].resolved.unwrap().lat, 300.0 * 0.001);
    }

    #[test]
    fn test_disambiguate_merges_coincident_nodes() {
        let (_dir, db) = temp_db();
        let store = NodeStore::create(&db, StagingSchema::Network).unwrap();
        // nodes 5 and 9 share coordinates; both are referenced by roads
        store.stage(&db, &node(9, 45.0, 7.0)).unwrap();
        store.stage(&db, &node(5, 45.0, 7.0)).unwrap();
        store.stage(&db, &node(6, 46.0, 8.0)).unwrap();
        store.increment_refcounts(&db, vec![9, 9, 5, 6]).unwrap();

        let rewritten = store.disambiguate(&db).unwrap();
        assert_eq!(rewritten, 2);

        let mut refs = vec![NodeRef::new(5), NodeRef::new(9), NodeRef::new(6)];
        store.resolve(&db, &mut refs).unwrap();
        // both coincident nodes alias to the lowest id and carry the sum
        assert_eq!(refs[0].resolved.unwrap().alias, 5);
        assert_eq!(refs[1].resolved.unwrap().alias, 5);
        assert_eq!(refs[0].resolved.unwrap().refcount, 3);
        assert_eq!(refs[1].resolved.unwrap().refcount, 3);
        // untouched singleton keeps its own identity
        assert_eq!(refs[2].resolved.unwrap().alias, 6);
        assert_eq!(refs[2].resolved.unwrap().refcount, 1);
    }
}
