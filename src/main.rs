use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use leaderscrap::{
    config::{Config, Server},
    info_time,
    process::{Outcome, Pager},
    shutdown::Shutdown,
    Result,
};
use tracing_subscriber::{fmt, fmt::time::ChronoLocal, EnvFilter};

#[derive(Parser)]
#[command(name = "leaderscrap")]
#[command(version, about = "Resumable leaderboard scraper", long_about = None)]
struct Cli {
    /// Leaderboard server to scrape
    #[arg(value_enum)]
    server: Server,

    /// Use this host instead of the server's default one
    #[arg(long, env = "LEADERSCRAP_BASE_URL")]
    base_url: Option<String>,

    /// Parent directory of the per-server data folders
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    fmt()
        .with_timer(ChronoLocal::rfc_3339())
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let start_time = Local::now();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    let root = config.storage_root(cli.server);
    let base_url = cli
        .base_url
        .unwrap_or_else(|| cli.server.base_url().to_string());

    let shutdown = Shutdown::new();
    let _signals = shutdown.listen_for_signals();

    let mut pager = Pager::new(base_url, &root, config, shutdown)?;
    match pager.run().await? {
        Outcome::Complete { page } => {
            info_time!(start_time, "Finished, leaderboard ends at page {}", page)
        }
        Outcome::Stopped { next_page } => {
            info_time!(start_time, "Stopped, next run starts at page {}", next_page)
        }
    }

    Ok(())
}
