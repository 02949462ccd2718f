use clap::Parser;
use spatialite_osm::app;
use spatialite_osm::config::{MapBuildConfig, MapImportConfiguration};
use spatialite_osm::model::BuildError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spatialite_osm_map")]
#[command(author, version, about = "imports OSM XML into a spatially-enabled SQLite map database")]
pub struct Args {
    #[arg(short = 'o', long = "osm-path", help = "the OSM-XML file path")]
    osm_path: PathBuf,
    #[arg(short = 'd', long = "db-path", help = "the output DB path")]
    db_path: PathBuf,
    #[arg(short = 'c', long = "cache-size", help = "DB cache size (how many pages)")]
    cache_size: Option<i64>,
    #[arg(short = 'm', long = "in-memory", help = "using IN-MEMORY database")]
    in_memory: bool,
    #[arg(short = 'n', long = "no-spatial-index", help = "suppress R*Tree generation")]
    no_spatial_index: bool,
    #[arg(long = "configuration-file", help = "TOML/JSON file with import parameters")]
    configuration_file: Option<String>,
}

fn run(args: &Args) -> Result<(), BuildError> {
    let file_conf = match &args.configuration_file {
        None => MapImportConfiguration::default(),
        Some(f) => {
            log::info!("reading import configuration from {f}");
            MapImportConfiguration::try_from(f)?
        }
    };
    let config = MapBuildConfig {
        osm_path: args.osm_path.clone(),
        db_path: args.db_path.clone(),
        cache_size: args.cache_size.unwrap_or(file_conf.cache_size),
        in_memory: args.in_memory || file_conf.in_memory,
        spatial_index: !args.no_spatial_index && file_conf.spatial_index,
    };
    app::map::run(&config)
}

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(-1);
        }
    };
    if let Err(e) = run(&args) {
        eprintln!("{e}");
        std::process::exit(-1);
    }
}
