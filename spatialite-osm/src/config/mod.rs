use crate::model::BuildError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// tunable parameters of a map import, loadable from a TOML or JSON file.
/// explicit CLI flags override whatever the file carries.
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct MapImportConfiguration {
    pub cache_size: i64,
    pub in_memory: bool,
    pub spatial_index: bool,
}

impl Default for MapImportConfiguration {
    fn default() -> Self {
        Self {
            cache_size: 0,
            in_memory: false,
            spatial_index: true,
        }
    }
}

impl TryFrom<&String> for MapImportConfiguration {
    type Error = BuildError;

    fn try_from(f: &String) -> Result<Self, Self::Error> {
        read_configuration(f)
    }
}

/// tunable parameters of a network import, loadable from a TOML or JSON
/// file. the arcs table name is always given on the command line.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct NetImportConfiguration {
    pub cache_size: i64,
    pub in_memory: bool,
    pub unidirectional: bool,
}

impl TryFrom<&String> for NetImportConfiguration {
    type Error = BuildError;

    fn try_from(f: &String) -> Result<Self, Self::Error> {
        read_configuration(f)
    }
}

fn read_configuration<T>(f: &String) -> Result<T, BuildError>
where
    T: serde::de::DeserializeOwned,
{
    if f.ends_with(".toml") {
        let s = std::fs::read_to_string(f)
            .map_err(|e| BuildError::Configuration(format!("failure reading {f}: {e}")))?;
        toml::from_str(&s)
            .map_err(|e| BuildError::Configuration(format!("failure decoding {f}: {e}")))
    } else if f.ends_with(".json") {
        let s = std::fs::read_to_string(f)
            .map_err(|e| BuildError::Configuration(format!("failure reading {f}: {e}")))?;
        serde_json::from_str(&s)
            .map_err(|e| BuildError::Configuration(format!("failure decoding {f}: {e}")))
    } else {
        Err(BuildError::Configuration(format!(
            "unsupported file type: {f}"
        )))
    }
}

/// fully resolved inputs of a map build.
#[derive(Clone, Debug)]
pub struct MapBuildConfig {
    pub osm_path: PathBuf,
    pub db_path: PathBuf,
    pub cache_size: i64,
    pub in_memory: bool,
    pub spatial_index: bool,
}

/// fully resolved inputs of a network build.
#[derive(Clone, Debug)]
pub struct NetBuildConfig {
    pub osm_path: PathBuf,
    pub db_path: PathBuf,
    pub table: String,
    pub cache_size: i64,
    pub in_memory: bool,
    pub unidirectional: bool,
}

#[cfg(test)]
mod tests {
    use super::{MapImportConfiguration, NetImportConfiguration};
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let c = MapImportConfiguration::default();
        assert_eq!(c.cache_size, 0);
        assert!(!c.in_memory);
        assert!(c.spatial_index);
        let n = NetImportConfiguration::default();
        assert!(!n.unidirectional);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "cache_size = 4096\nin_memory = true").unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let c = MapImportConfiguration::try_from(&path).unwrap();
        assert_eq!(c.cache_size, 4096);
        assert!(c.in_memory);
        // unspecified keys keep their defaults
        assert!(c.spatial_index);
    }

    #[test]
    fn test_json_and_unsupported() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{\"unidirectional\": true}}").unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let c = NetImportConfiguration::try_from(&path).unwrap();
        assert!(c.unidirectional);

        let bad = String::from("params.yaml");
        assert!(NetImportConfiguration::try_from(&bad).is_err());
    }
}
