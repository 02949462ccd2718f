use clap::Parser;
use spatialite_osm::app;
use spatialite_osm::config::{NetBuildConfig, NetImportConfiguration};
use spatialite_osm::model::BuildError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spatialite_osm_net")]
#[command(author, version, about = "builds a routable road network from OSM XML")]
pub struct Args {
    #[arg(short = 'o', long = "osm-path", help = "the OSM-XML file path")]
    osm_path: PathBuf,
    #[arg(short = 'd', long = "db-path", help = "the output DB path")]
    db_path: PathBuf,
    #[arg(short = 'T', long = "table", help = "the arcs table to be fed")]
    table: String,
    #[arg(short = 'c', long = "cache-size", help = "DB cache size (how many pages)")]
    cache_size: Option<i64>,
    #[arg(short = 'm', long = "in-memory", help = "using IN-MEMORY database")]
    in_memory: bool,
    #[arg(
        short = '2',
        long = "unidirectional",
        help = "emit two rows (one per direction) instead of oneway flags"
    )]
    unidirectional: bool,
    #[arg(long = "configuration-file", help = "TOML/JSON file with import parameters")]
    configuration_file: Option<String>,
}

fn run(args: &Args) -> Result<(), BuildError> {
    let file_conf = match &args.configuration_file {
        None => NetImportConfiguration::default(),
        Some(f) => {
            log::info!("reading import configuration from {f}");
            NetImportConfiguration::try_from(f)?
        }
    };
    let config = NetBuildConfig {
        osm_path: args.osm_path.clone(),
        db_path: args.db_path.clone(),
        table: args.table.clone(),
        cache_size: args.cache_size.unwrap_or(file_conf.cache_size),
        in_memory: args.in_memory || file_conf.in_memory,
        unidirectional: args.unidirectional || file_conf.unidirectional,
    };
    app::net::run(&config)
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
    match run(&args) {
        Ok(()) => {}
        Err(e @ (BuildError::Configuration(_) | BuildError::Setup(_))) => {
            eprintln!("{e}");
            std::process::exit(-1);
        }
        Err(e) => {
            eprintln!("{e}");
            eprintln!("sorry, quitting ... UNRECOVERABLE ERROR");
            std::process::exit(1);
        }
    }
}
