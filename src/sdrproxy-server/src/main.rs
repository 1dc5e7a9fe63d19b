mod config;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use tracing::info;

use config::ServerConfig;
use logging::init_logging;
use sdrproxy_registry::Registry;

type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - SDR multiplexer daemon");

#[derive(Debug, Parser)]
#[command(author, version, about = PKG_DESCRIPTION)]
struct Cli {
    /// Path to a sdrproxy.toml configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print an example configuration file and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Override the listen address from config
    #[arg(long = "listen", short = 'l')]
    listen: Option<String>,
    /// Override the listen port from config
    #[arg(long = "port", short = 'p')]
    port: Option<u16>,
}

#[actix_web::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        (ServerConfig::load_from_file(path)?, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };

    if let Some(ref host) = cli.listen {
        cfg.listen.host = host.clone();
    }
    if let Some(port) = cli.port {
        cfg.listen.port = port;
    }

    init_logging(cfg.log_level.as_deref());

    if let Some(path) = config_path {
        info!("loaded configuration from {}", path.display());
    } else {
        info!("no configuration file found, running on defaults");
    }

    let listen_addr = cfg.listen_addr()?;
    let radios = cfg.radios.clone();
    let locator: sdrproxy_registry::DeviceLocator = Arc::new(move |radio_id: &str| -> Option<std::net::SocketAddr> {
        radios.get(radio_id)?.parse().ok()
    });
    let registry = Arc::new(Registry::new(locator));
    let registry_data = web::Data::new(registry);

    info!("sdrproxy-server listening on {listen_addr}");
    HttpServer::new(move || {
        App::new()
            .app_data(registry_data.clone())
            .configure(sdrproxy_http::configure)
    })
    .bind(listen_addr)?
    .run()
    .await?;

    Ok(())
}
