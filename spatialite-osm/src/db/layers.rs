use super::Database;
use crate::model::geometry::GeometryClass;
use crate::model::osm::Osmid;
use crate::model::BuildError;
use rusqlite::params;

/// the fixed layer taxonomy, in priority order: when an entity carries
/// several discriminator keys, the earliest listed layer wins.
pub const LAYER_NAMES: [&str; 33] = [
    "highway",
    "junction",
    "traffic_calming",
    "traffic_sign",
    "service",
    "barrier",
    "cycleway",
    "tracktype",
    "waterway",
    "railway",
    "aeroway",
    "aerialway",
    "power",
    "man_made",
    "leisure",
    "amenity",
    "shop",
    "tourism",
    "historic",
    "landuse",
    "military",
    "natural",
    "geological",
    "route",
    "boundary",
    "sport",
    "abutters",
    "accessories",
    "properties",
    "restrictions",
    "place",
    "building",
    "parking",
];

/// layers whose closed ways are interpreted as polygons even without an
/// explicit `area=yes` tag.
pub const AREAL_LAYERS: [&str; 11] = [
    "amenity", "building", "historic", "landuse", "leisure", "natural", "parking", "place",
    "shop", "sport", "tourism",
];

/// output shape of a layer cell: `pt_*`, `ln_*` or `pg_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerShape {
    Point,
    Line,
    Polygon,
}

impl LayerShape {
    fn prefix(&self) -> &'static str {
        match self {
            LayerShape::Point => "pt_",
            LayerShape::Line => "ln_",
            LayerShape::Polygon => "pg_",
        }
    }

    fn geometry_class(&self) -> GeometryClass {
        match self {
            LayerShape::Point => GeometryClass::Point,
            LayerShape::Line => GeometryClass::MultiLineString,
            LayerShape::Polygon => GeometryClass::MultiPolygon,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum SinkState {
    /// table not yet created; first insert creates it lazily
    #[default]
    Pending,
    Ready,
    /// an insert failed: the failure was reported once and every further
    /// row for this cell is dropped silently
    Broken,
}

#[derive(Default)]
struct LayerSink {
    point: SinkState,
    line: SinkState,
    polygon: SinkState,
}

/// address fields captured from a node's `addr:*` tags.
#[derive(Debug, Default, Clone, Copy)]
pub struct Address<'a> {
    pub country: Option<&'a str>,
    pub city: Option<&'a str>,
    pub postcode: Option<&'a str>,
    pub street: Option<&'a str>,
    pub housename: Option<&'a str>,
    pub housenumber: Option<&'a str>,
}

impl Address<'_> {
    pub fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.city.is_none()
            && self.postcode.is_none()
            && self.street.is_none()
            && self.housename.is_none()
            && self.housenumber.is_none()
    }
}

/// per-layer output sinks, created lazily the first time a geometry of a
/// given shape is emitted for a layer. the generic and address tables are
/// created up front by [`ensure_map_schema`].
pub struct LayerSet {
    sinks: Vec<LayerSink>,
    generic_point: SinkState,
    addresses: SinkState,
    generic_line: SinkState,
    generic_polygon: SinkState,
}

impl Default for LayerSet {
    fn default() -> Self {
        LayerSet::new()
    }
}

impl LayerSet {
    pub fn new() -> LayerSet {
        LayerSet {
            sinks: (0..LAYER_NAMES.len()).map(|_| LayerSink::default()).collect(),
            generic_point: SinkState::Ready,
            addresses: SinkState::Ready,
            generic_line: SinkState::Ready,
            generic_polygon: SinkState::Ready,
        }
    }

    /// inserts one row into `<shape-prefix><layer>`, creating the table on
    /// first use. unknown layer names are ignored.
    pub fn insert_layer(
        &mut self,
        db: &Database,
        shape: LayerShape,
        layer: &str,
        id: Osmid,
        sub_type: Option<&str>,
        name: Option<&str>,
        geometry: &[u8],
    ) -> Result<(), BuildError> {
        let index = match LAYER_NAMES.iter().position(|l| *l == layer) {
            Some(index) => index,
            None => return Ok(()),
        };
        let state = match shape {
            LayerShape::Point => &mut self.sinks[index].point,
            LayerShape::Line => &mut self.sinks[index].line,
            LayerShape::Polygon => &mut self.sinks[index].polygon,
        };
        if *state == SinkState::Pending {
            match create_layer_table(db, shape, layer) {
                Ok(()) => *state = SinkState::Ready,
                Err(e) => {
                    eprintln!("{e}");
                    *state = SinkState::Broken;
                }
            }
        }
        if *state == SinkState::Broken {
            return Ok(());
        }
        let table = format!("{}{layer}", shape.prefix());
        let result = db
            .conn()
            .prepare_cached(&format!(
                "INSERT INTO \"{table}\" (id, sub_type, name, Geometry) VALUES (?1, ?2, ?3, ?4)"
            ))?
            .execute(params![id, sub_type, name, geometry]);
        if let Err(e) = result {
            eprintln!("{}", BuildError::Step(format!("{e}: {table}")));
            *state = SinkState::Broken;
        }
        Ok(())
    }

    pub fn insert_generic_point(
        &mut self,
        db: &Database,
        id: Osmid,
        name: Option<&str>,
        geometry: &[u8],
    ) -> Result<(), BuildError> {
        let state = &mut self.generic_point;
        insert_generic(db, state, "pt_generic", id, name, geometry)
    }

    pub fn insert_generic_line(
        &mut self,
        db: &Database,
        id: Osmid,
        name: Option<&str>,
        geometry: &[u8],
    ) -> Result<(), BuildError> {
        let state = &mut self.generic_line;
        insert_generic(db, state, "ln_generic", id, name, geometry)
    }

    pub fn insert_generic_polygon(
        &mut self,
        db: &Database,
        id: Osmid,
        name: Option<&str>,
        geometry: &[u8],
    ) -> Result<(), BuildError> {
        let state = &mut self.generic_polygon;
        insert_generic(db, state, "pg_generic", id, name, geometry)
    }

    pub fn insert_address(
        &mut self,
        db: &Database,
        id: Osmid,
        address: &Address<'_>,
        geometry: &[u8],
    ) -> Result<(), BuildError> {
        if self.addresses == SinkState::Broken {
            return Ok(());
        }
        let result = db
            .conn()
            .prepare_cached(
                "INSERT INTO pt_addresses \
                 (id, country, city, postcode, street, housename, housenumber, Geometry) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?
            .execute(params![
                id,
                address.country,
                address.city,
                address.postcode,
                address.street,
                address.housename,
                address.housenumber,
                geometry
            ]);
        if let Err(e) = result {
            eprintln!("{}", BuildError::Step(format!("{e}: pt_addresses")));
            self.addresses = SinkState::Broken;
        }
        Ok(())
    }
}

fn insert_generic(
    db: &Database,
    state: &mut SinkState,
    table: &str,
    id: Osmid,
    name: Option<&str>,
    geometry: &[u8],
) -> Result<(), BuildError> {
    if *state == SinkState::Broken {
        return Ok(());
    }
    let result = db
        .conn()
        .prepare_cached(&format!(
            "INSERT INTO \"{table}\" (id, name, Geometry) VALUES (?1, ?2, ?3)"
        ))?
        .execute(params![id, name, geometry]);
    if let Err(e) = result {
        eprintln!("{}", BuildError::Step(format!("{e}: {table}")));
        *state = SinkState::Broken;
    }
    Ok(())
}

fn create_layer_table(db: &Database, shape: LayerShape, layer: &str) -> Result<(), BuildError> {
    let table = format!("{}{layer}", shape.prefix());
    db.execute_ddl(
        &table,
        &format!(
            "CREATE TABLE \"{table}\" (\n\
             id INTEGER NOT NULL PRIMARY KEY,\n\
             sub_type TEXT,\n\
             name TEXT)"
        ),
    )?;
    db.add_geometry_column(&table, "Geometry", shape.geometry_class())?;
    Ok(())
}

/// creates the always-present map output tables: the generic fallbacks and
/// the address table.
pub fn ensure_map_schema(db: &Database) -> Result<(), BuildError> {
    db.execute_ddl(
        "pt_generic",
        "CREATE TABLE pt_generic (\nid INTEGER NOT NULL PRIMARY KEY,\nname TEXT)",
    )?;
    db.add_geometry_column("pt_generic", "Geometry", GeometryClass::Point)?;
    db.execute_ddl(
        "pt_addresses",
        "CREATE TABLE pt_addresses (\n\
         id INTEGER NOT NULL PRIMARY KEY,\n\
         country TEXT,\n\
         city TEXT,\n\
         postcode TEXT,\n\
         street TEXT,\n\
         housename TEXT,\n\
         housenumber TEXT)",
    )?;
    db.add_geometry_column("pt_addresses", "Geometry", GeometryClass::Point)?;
    db.execute_ddl(
        "ln_generic",
        "CREATE TABLE ln_generic (\nid INTEGER NOT NULL PRIMARY KEY,\nname TEXT)",
    )?;
    db.add_geometry_column("ln_generic", "Geometry", GeometryClass::MultiLineString)?;
    db.execute_ddl(
        "pg_generic",
        "CREATE TABLE pg_generic (\nid INTEGER NOT NULL PRIMARY KEY,\nname TEXT)",
    )?;
    db.add_geometry_column("pg_generic", "Geometry", GeometryClass::MultiPolygon)?;
    Ok(())
}
