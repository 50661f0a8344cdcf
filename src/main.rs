use anyhow::Result;
use clap::{Arg, Command};
use sawitdb::server::{SawitServer, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

/// Entry point for the SawitDB server binary.
///
/// Parses the listen address and data directory, initializes logging,
/// and serves the JSON-lines protocol until killed.
#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("sawitdb")
        .about("Plantation database server speaking JSON lines over TCP")
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .default_value("data")
                .help("Directory holding one .sawit file per database"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("ADDR")
                .default_value("0.0.0.0")
                .help("Address to bind"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .default_value("7878")
                .help("Port to listen on"),
        )
        .arg(
            Arg::new("max-connections")
                .long("max-connections")
                .value_name("N")
                .default_value("100")
                .help("Concurrent client connection limit"),
        )
        .get_matches();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = ServerConfig {
        host: matches.get_one::<String>("host").unwrap().clone(),
        port: matches.get_one::<String>("port").unwrap().parse()?,
        data_dir: matches.get_one::<String>("data-dir").unwrap().into(),
        max_connections: matches.get_one::<String>("max-connections").unwrap().parse()?,
        auth: None,
    };

    Arc::new(SawitServer::new(config)).serve().await
}
