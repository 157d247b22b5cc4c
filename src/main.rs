mod api;
mod app;
mod cache;
mod commands;
mod config;
mod error;
mod event;
mod query;
mod sync;
mod telemetry;
mod ui;

use cache::storage::{data_dir, DurableStorage, NoopStorage, SqliteStorage, APP_PREFIX};
use cache::CacheStore;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use sync::TombstoneStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "herdbook")]
#[command(about = "A terminal admin client for livestock records")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/herdbook/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Resource to open at startup (animals, treatments, vaccines, ...)
  #[arg(short, long)]
  resource: Option<String>,

  /// Initial list query, e.g. "search=angus&page=2"
  #[arg(short, long)]
  query: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Manage the local cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Remove every cached response and tombstone
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  if let Some(Commands::Cache {
    action: CacheAction::Clear,
  }) = args.command
  {
    let removed = SqliteStorage::open()?.remove_prefix(APP_PREFIX)?;
    println!("Removed {} cached entries", removed);
    return Ok(());
  }

  // Stdout belongs to the terminal UI, so logs go to a file
  let log_dir = data_dir()?;
  let (writer, _guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "herdbook.log"));
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("HERDBOOK_LOG").unwrap_or_else(|_| EnvFilter::new("herdbook=info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override resource if specified on command line
  if let Some(name) = args.resource {
    let kind = api::ResourceKind::from_name(&name)
      .ok_or_else(|| color_eyre::eyre::eyre!("Unknown resource: {}", name))?;
    config.default_resource = Some(kind);
  }

  let storage: Arc<dyn DurableStorage> = if config.cache.enabled {
    match SqliteStorage::open() {
      Ok(storage) => Arc::new(storage),
      Err(e) => {
        warn!(error = %e, "Durable cache unavailable, caching in memory only");
        Arc::new(NoopStorage)
      }
    }
  } else {
    Arc::new(NoopStorage)
  };
  info!(url = %config.api.url, durable = config.cache.enabled, "Starting");

  let cache = Arc::new(CacheStore::new(storage.clone()).with_default_ttl(config.default_ttl()));
  let tombstones = Arc::new(TombstoneStore::new(storage));

  let services = app::Services::new(config, cache, tombstones)?;
  let location = args
    .query
    .as_deref()
    .map(sync::ParamSource::from_query_string)
    .unwrap_or_default();
  let mut app = app::App::new(services, location);
  app.run().await?;

  Ok(())
}
