mod app;
mod cache;
mod commands;
mod config;
mod event;
mod gateway;
mod legends;
mod net;
mod store;
mod sync;
mod ui;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lgnd")]
#[command(about = "An offline-capable random legend picker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lgnd/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Never touch the network; run from cached data only
  #[arg(long)]
  offline: bool,

  /// How many legends to draw (overrides config)
  #[arg(short, long)]
  squad_size: Option<usize>,
}

/// Log to a file in the data directory; stderr belongs to the terminal UI.
fn init_tracing(data_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
  let file = tracing_appender::rolling::never(data_dir, "lgnd.log");
  let (writer, guard) = tracing_appender::non_blocking(file);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override squad size if specified on command line
  let config = if let Some(size) = args.squad_size {
    config::Config {
      squad_size: size.clamp(config::MIN_SQUAD_SIZE, config::MAX_SQUAD_SIZE),
      ..config
    }
  } else {
    config
  };

  let data_dir = config.data_dir()?;
  let _guard = init_tracing(&data_dir);
  tracing::info!("Starting lgnd {}", env!("CARGO_PKG_VERSION"));

  // Initialize and run the app
  let mut app = app::App::new(config, args.offline).await?;
  app.run().await?;

  Ok(())
}
