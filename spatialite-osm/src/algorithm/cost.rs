use crate::model::osm::Tag;

/// highway classes that never enter the road network.
pub const EXCLUDED_HIGHWAY_CLASSES: [&str; 10] = [
    "pedestrian",
    "track",
    "services",
    "bus_guideway",
    "path",
    "cycleway",
    "footway",
    "bridleway",
    "byway",
    "steps",
];

pub const DEFAULT_SPEED_KMH: f64 = 30.0;

/// road class of a way: the value of the first `highway` tag whose class
/// is not excluded. None means the way takes no part in the network.
pub fn road_class(tags: &[Tag]) -> Option<&str> {
    tags.iter()
        .find(|t| t.key == "highway" && !EXCLUDED_HIGHWAY_CLASSES.contains(&t.value.as_str()))
        .map(|t| t.value.as_str())
}

/// estimated travel speed per road class, in km/h.
///
/// the `secundary` key is a deliberate carry-over of the upstream
/// importer's misspelling: real-world `highway=secondary` ways fall back
/// to the 30 km/h default exactly as they always have, and correcting the
/// spelling would silently change every produced cost column.
pub fn speed_kmh(class: &str) -> f64 {
    match class {
        "motorway" | "trunk" => 110.0,
        "primary" => 90.0,
        "secundary" => 70.0,
        "tertiary" => 50.0,
        _ => DEFAULT_SPEED_KMH,
    }
}

/// traversal time in seconds for an arc of the given class and length.
pub fn traversal_cost_seconds(class: &str, length_m: f64) -> f64 {
    let meters_per_second = speed_kmh(class) * 1000.0 / 3600.0;
    length_m / meters_per_second
}

/// direction markers of a road way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnewayFlags {
    pub oneway: bool,
    pub reverse: bool,
}

/// scans every `oneway` tag: `yes` and `1` mark a forward oneway, `-1` a
/// reversed one; any other value leaves the flags untouched.
pub fn oneway_flags(tags: &[Tag]) -> OnewayFlags {
    let mut flags = OnewayFlags::default();
    for t in tags.iter().filter(|t| t.key == "oneway") {
        match t.value.as_str() {
            "yes" | "1" => {
                flags.oneway = true;
                flags.reverse = false;
            }
            "-1" => {
                flags.oneway = true;
                flags.reverse = true;
            }
            _ => {}
        }
    }
    flags
}

/// display name of a road: the first `name` tag, else the first `ref`
/// tag, else the literal `unknown`.
pub fn road_name(tags: &[Tag]) -> &str {
    crate::model::osm::tag::first_value(tags, "name")
        .or_else(|| crate::model::osm::tag::first_value(tags, "ref"))
        .unwrap_or("unknown")
}
