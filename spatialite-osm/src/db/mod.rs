pub mod arc_store;
pub mod layers;
pub mod node_store;
pub mod way_store;

use crate::model::geometry::{blob, GeometryClass, SRID_WGS84};
use crate::model::BuildError;
use geo::BoundingRect;
use rusqlite::backup::{Backup, StepResult};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 1024;
const STATEMENT_CACHE_CAPACITY: usize = 256;

/// wraps the SQLite handle shared by every component of a pipeline run.
///
/// owns the spatial-metadata bootstrap, transaction boundaries, the
/// geometry-column registry, spatial index creation and the optional
/// in-memory twin populated through the online-backup API.
pub struct Database {
    conn: Connection,
    path: PathBuf,
    in_memory: bool,
}

impl Database {
    /// opens (or creates) the database at `path`, bootstrapping or
    /// verifying the spatial metadata. `cache_pages > 0` applies a
    /// `cache_size` PRAGMA; `in_memory` clones the disk database into a
    /// `:memory:` twin and runs everything there until [`finish`].
    ///
    /// [`finish`]: Database::finish
    pub fn open<P: AsRef<Path>>(
        path: P,
        cache_pages: i64,
        in_memory: bool,
    ) -> Result<Database, BuildError> {
        let path = path.as_ref().to_path_buf();
        let disk = Connection::open(&path)
            .map_err(|e| BuildError::Setup(format!("cannot open '{}': {e}", path.display())))?;
        ensure_spatial_metadata(&disk, &path)?;
        log::info!("SQLite version: {}", rusqlite::version());

        let conn = if in_memory {
            let mut mem = Connection::open_in_memory()
                .map_err(|e| BuildError::Setup(format!("cannot open 'MEMORY-DB': {e}")))?;
            copy_database(&disk, &mut mem)
                .map_err(|_| BuildError::Setup(String::from("cannot load 'MEMORY-DB'")))?;
            log::info!("using IN-MEMORY database");
            mem
        } else {
            if cache_pages > 0 {
                disk.execute_batch(&format!("PRAGMA cache_size={cache_pages}"))?;
            }
            disk
        };
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        Ok(Database {
            conn,
            path,
            in_memory,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn begin(&self) -> Result<(), BuildError> {
        self.conn.execute_batch("BEGIN").map_err(BuildError::Begin)
    }

    pub fn commit(&self) -> Result<(), BuildError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(BuildError::Commit)
    }

    /// runs a DDL statement, mapping failure onto the stable
    /// `CREATE TABLE '<name>' error:` diagnostic.
    pub fn execute_ddl(&self, table: &str, sql: &str) -> Result<(), BuildError> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| BuildError::CreateTable {
                table: table.to_string(),
                source: e,
            })
    }

    /// appends a geometry BLOB column and registers it in
    /// `geometry_columns` with the declared type, XY dimension and SRID
    /// 4326.
    pub fn add_geometry_column(
        &self,
        table: &str,
        column: &str,
        class: GeometryClass,
    ) -> Result<(), BuildError> {
        self.conn
            .execute_batch(&format!(
                "ALTER TABLE \"{table}\" ADD COLUMN \"{column}\" BLOB"
            ))
            .map_err(|e| BuildError::CreateTable {
                table: table.to_string(),
                source: e,
            })?;
        self.conn
            .execute(
                "INSERT INTO geometry_columns \
                 (f_table_name, f_geometry_column, type, coord_dimension, srid, spatial_index_enabled) \
                 VALUES (?1, ?2, ?3, 'XY', ?4, 0)",
                params![table, column, class.as_sql(), SRID_WGS84],
            )
            .map_err(|e| BuildError::CreateTable {
                table: table.to_string(),
                source: e,
            })?;
        Ok(())
    }

    /// removes a table's rows from the geometry-column registry (done
    /// before dropping a temp table).
    pub fn discard_geometry_column(&self, table: &str) -> Result<(), BuildError> {
        self.conn.execute(
            "DELETE FROM geometry_columns WHERE f_table_name = ?1",
            params![table],
        )?;
        Ok(())
    }

    /// builds an R*Tree index over every registered geometry column.
    /// per-table failures are reported and skipped, as the original tool
    /// does.
    pub fn create_spatial_indexes(&self) -> Result<(), BuildError> {
        let mut stmt = self
            .conn
            .prepare("SELECT f_table_name, f_geometry_column FROM geometry_columns")?;
        let pairs = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        for (table, column) in pairs {
            if let Err(e) = self.create_spatial_index(&table, &column) {
                eprintln!("SpatialIndex '{table}'.'{column}' error: {e}");
            }
        }
        Ok(())
    }

    fn create_spatial_index(&self, table: &str, column: &str) -> Result<(), BuildError> {
        let index = format!("idx_{table}_{column}");
        self.conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE \"{index}\" USING rtree(pkid, xmin, xmax, ymin, ymax)"
        ))?;
        let mut select = self.conn.prepare(&format!(
            "SELECT id, \"{column}\" FROM \"{table}\" WHERE \"{column}\" IS NOT NULL"
        ))?;
        let mut insert = self.conn.prepare(&format!(
            "INSERT INTO \"{index}\" (pkid, xmin, xmax, ymin, ymax) VALUES (?1, ?2, ?3, ?4, ?5)"
        ))?;
        let mut rows = select.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            let geom = blob::from_blob(&bytes)?;
            if let Some(rect) = geom.bounding_rect() {
                insert.execute(params![id, rect.min().x, rect.max().x, rect.min().y, rect.max().y])?;
            }
        }
        self.conn.execute(
            "UPDATE geometry_columns SET spatial_index_enabled = 1 \
             WHERE f_table_name = ?1 AND f_geometry_column = ?2",
            params![table, column],
        )?;
        Ok(())
    }

    /// exports the in-memory twin back to disk (no-op otherwise), then
    /// VACUUMs the surviving database. a VACUUM failure is reported but
    /// does not fail the run, matching the original tools.
    pub fn finish(self) -> Result<(), BuildError> {
        let target = if self.in_memory {
            log::info!("exporting IN_MEMORY database");
            let mut disk = Connection::open(&self.path).map_err(|e| {
                BuildError::Setup(format!("cannot open '{}': {e}", self.path.display()))
            })?;
            copy_database(&self.conn, &mut disk).map_err(|_| {
                BuildError::Setup(String::from("Backup failure: 'MEMORY-DB' wasn't saved"))
            })?;
            log::info!("IN_MEMORY database successfully exported");
            disk
        } else {
            self.conn
        };
        log::info!("VACUUMing the DB");
        if let Err(e) = target.execute_batch("VACUUM").map_err(BuildError::Vacuum) {
            eprintln!("{e}");
        }
        Ok(())
    }
}

fn copy_database(src: &Connection, dst: &mut Connection) -> Result<(), rusqlite::Error> {
    let backup = Backup::new(src, dst)?;
    loop {
        match backup.step(BACKUP_PAGES_PER_STEP)? {
            StepResult::Done => return Ok(()),
            StepResult::More | StepResult::Busy | StepResult::Locked | _ => {}
        }
    }
}

const SPATIAL_REF_SYS_COLUMNS: [&str; 5] =
    ["srid", "auth_name", "auth_srid", "ref_sys_name", "proj4text"];
const GEOMETRY_COLUMNS_COLUMNS: [&str; 6] = [
    "f_table_name",
    "f_geometry_column",
    "type",
    "coord_dimension",
    "srid",
    "spatial_index_enabled",
];

/// creates the spatial metadata tables in an empty database, or verifies
/// that a pre-existing database already carries them in the expected
/// shape.
fn ensure_spatial_metadata(conn: &Connection, path: &Path) -> Result<(), BuildError> {
    let object_count: i64 =
        conn.query_row("SELECT Count(*) FROM sqlite_master", [], |row| row.get(0))?;
    if object_count == 0 {
        conn.execute_batch(
            "CREATE TABLE spatial_ref_sys (\n\
             srid INTEGER NOT NULL PRIMARY KEY,\n\
             auth_name TEXT NOT NULL,\n\
             auth_srid INTEGER NOT NULL,\n\
             ref_sys_name TEXT,\n\
             proj4text TEXT NOT NULL);\n\
             INSERT INTO spatial_ref_sys VALUES \
             (4326, 'epsg', 4326, 'WGS 84', '+proj=longlat +datum=WGS84 +no_defs');\n\
             CREATE TABLE geometry_columns (\n\
             f_table_name TEXT NOT NULL,\n\
             f_geometry_column TEXT NOT NULL,\n\
             type TEXT NOT NULL,\n\
             coord_dimension TEXT NOT NULL,\n\
             srid INTEGER,\n\
             spatial_index_enabled INTEGER NOT NULL,\n\
             PRIMARY KEY (f_table_name, f_geometry_column));",
        )
        .map_err(|e| BuildError::Setup(format!("spatial metadata bootstrap failed: {e}")))?;
        return Ok(());
    }
    let srs_ok = table_has_columns(conn, "spatial_ref_sys", &SPATIAL_REF_SYS_COLUMNS)?;
    let gc_ok = table_has_columns(conn, "geometry_columns", &GEOMETRY_COLUMNS_COLUMNS)?;
    if srs_ok && gc_ok {
        Ok(())
    } else {
        Err(BuildError::Setup(format!(
            "DB '{}' doesn't seem to contain valid Spatial Metadata",
            path.display()
        )))
    }
}

fn table_has_columns(
    conn: &Connection,
    table: &str,
    required: &[&str],
) -> Result<bool, BuildError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(required
        .iter()
        .all(|col| names.iter().any(|n| n.eq_ignore_ascii_case(col))))
}
