use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use debrid_dav::{CliArgs, Config};

#[derive(Parser)]
#[command(name = "debrid-dav")]
#[command(about = "A WebDAV server exposing debrid torrent libraries")]
struct Cli {
    #[arg(short, long, help = "Path to the configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Bind address, overrides the configuration")]
    bind: Option<String>,

    #[arg(short, long, help = "Listen port, overrides the configuration")]
    port: Option<u16>,

    #[arg(long, help = "Cache directory, overrides the configuration")]
    cache_root: Option<PathBuf>,

    #[arg(long, help = "Log level filter, e.g. info or debrid_dav=debug")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let args = CliArgs {
        config_file: cli.config,
        bind: cli.bind,
        port: cli.port,
        cache_root: cli.cache_root,
        log_level: cli.log_level,
    };

    let config = Config::load_with_cli(&args)?;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    config.validate()?;

    debrid_dav::run(config).await
}
