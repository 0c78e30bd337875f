mod cache;
mod config;
mod control;
mod event;
mod gateway;
mod net;
mod policy;

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use cache::{CacheManager, SqliteStorage};
use config::Config;
use control::message::{self, PageMessage};
use control::sync;
use net::HttpFetcher;
use policy::{CachePolicy, Destination, StashRequest};

#[derive(Parser, Debug)]
#[command(name = "webstash")]
#[command(about = "Offline cache manager and local gateway for static sites")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/webstash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache the core file set, prune stale stores, warm static assets
  Install,
  /// Bring the cache up, then serve the local gateway
  Serve,
  /// Resolve one URL or path through the strategy table, body to stdout
  Fetch {
    target: String,
    /// Use the ad hoc runtime store instead of the routing table
    #[arg(long)]
    runtime: bool,
  },
  /// Cache a list of URLs into the dynamic store
  CacheUrls { urls: Vec<String> },
  /// Delete one named store
  DeleteCache { name: String },
  /// Show every store with its entry count and URLs
  Info,
  /// Print the version tag
  Version,
  /// Trigger a sync tag (unknown tags are ignored)
  Sync { tag: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;

  // Keep the non-blocking writer alive for the lifetime of the process
  let _guard = init_tracing(&data_dir, matches!(args.command, Command::Serve));

  let policy = CachePolicy::from_config(&config)?;
  let storage = Arc::new(SqliteStorage::open(&data_dir.join("cache.db"))?);
  let fetcher = HttpFetcher::new()?;
  let manager = Arc::new(CacheManager::new(
    policy,
    storage,
    Arc::new(fetcher.clone()),
  ));

  match args.command {
    Command::Install => {
      manager.install().await?;
      manager.activate().await?;
      manager.warm_static_assets().await;
      println!("installed {}", manager.version());
    }
    Command::Serve => {
      manager.install().await?;
      manager.activate().await?;

      // Warm-up must not delay the gateway coming up
      let warmup = Arc::clone(&manager);
      tokio::spawn(async move {
        warmup.warm_static_assets().await;
      });

      let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .map_err(|e| eyre!("Invalid gateway address: {}", e))?;
      gateway::run(
        manager,
        fetcher.client().clone(),
        config.notifications.clone(),
        addr,
      )
      .await?;
    }
    Command::Fetch { target, runtime } => {
      let url = manager.resolve(&target)?;
      let served = if runtime {
        manager.runtime_fetch(&url).await
      } else {
        let destination = Destination::classify(&target, None);
        manager.handle_request(&StashRequest { url, destination }).await
      };

      eprintln!("{} ({:?})", served.status, served.source);
      std::io::stdout().write_all(&served.body)?;
    }
    Command::CacheUrls { urls } => {
      print_reply(&message::dispatch(&manager, PageMessage::CacheUrls { urls }).await?)?;
    }
    Command::DeleteCache { name } => {
      print_reply(&message::dispatch(&manager, PageMessage::DeleteCache { cache_name: name }).await?)?;
    }
    Command::Info => {
      print_reply(&message::dispatch(&manager, PageMessage::GetCacheInfo).await?)?;
    }
    Command::Version => {
      print_reply(&message::dispatch(&manager, PageMessage::GetVersion).await?)?;
    }
    Command::Sync { tag } => {
      sync::handle_tag(&manager, &tag).await?;
    }
  }

  Ok(())
}

fn print_reply(reply: &message::MessageReply) -> Result<()> {
  println!(
    "{}",
    serde_json::to_string_pretty(reply).map_err(|e| eyre!("Failed to render reply: {}", e))?
  );
  Ok(())
}

/// Env-filtered logs to stderr; the gateway also writes daily-rolling files
/// under the data directory.
fn init_tracing(data_dir: &Path, log_to_file: bool) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webstash=info"));

  if log_to_file {
    let appender = tracing_appender::rolling::daily(data_dir.join("logs"), "webstash.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr.and(writer))
      .with_ansi(false)
      .init();
    Some(guard)
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    None
  }
}
