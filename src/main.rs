use bael_offline::clients::ClientRegistry;
use bael_offline::config::Config;
use bael_offline::db::Database;
use bael_offline::net::HttpNetwork;
use bael_offline::push::LogNotifier;
use bael_offline::sync::SyncTag;
use bael_offline::worker::{Capabilities, ClientMessage, SyncOutcome, Worker, WorkerSettings};
use bael_offline::{logging, server};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "bael-offline")]
#[command(about = "Offline cache controller and caching proxy for the Bael web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/bael-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to cache, e.g. http://127.0.0.1:50001
  #[arg(long, env = "BAEL_OFFLINE_ORIGIN")]
  origin: Option<String>,

  /// Database file
  #[arg(long)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache, activate and run the caching proxy
  Serve {
    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,
  },
  /// Precache the manifest into the static partition
  Install,
  /// Delete partitions left over from other versions
  Activate,
  /// Run a background sync event (sync-messages, sync-data)
  Sync { tag: String },
  /// Queue a JSON message for the next sync-messages run
  Enqueue { message: String },
  /// Fetch URLs into the dynamic partition
  CacheUrls { urls: Vec<String> },
  /// Delete one partition, or every partition of this app
  ClearCache { name: Option<String> },
  /// Print the total size of cached bodies in bytes
  CacheSize,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(database) = args.database {
    config.database = Some(database);
  }

  let _guard = logging::init(config.log_dir.as_deref())?;

  let registry = Arc::new(ClientRegistry::new());
  let db = Arc::new(Database::open(config.database.as_deref())?);
  let network = Arc::new(HttpNetwork::new(&config.network)?);
  let worker = Worker::new(
    WorkerSettings::from_config(&config)?,
    Capabilities::sqlite(db, network, registry.clone(), Arc::new(LogNotifier)),
  );

  match args.command {
    Command::Serve { listen } => {
      let listen = listen.unwrap_or_else(|| config.listen.clone());
      let addr: SocketAddr = listen
        .parse()
        .map_err(|e| eyre!("Invalid listen address '{}': {}", listen, e))?;

      worker.start().await?;
      server::serve(worker, registry, addr).await?;
    }
    Command::Install => {
      let report = worker.install().await?;
      println!("cached {} assets, {} failed", report.cached.len(), report.failed.len());
      for path in report.failed {
        println!("  failed: {}", path);
      }
    }
    Command::Activate => {
      for name in worker.activate().await? {
        println!("deleted {}", name);
      }
    }
    Command::Sync { tag } => {
      let tag: SyncTag = tag.parse()?;
      match worker.sync(&tag).await? {
        SyncOutcome::Replayed(report) => {
          println!("sent {}, retained {}", report.sent.len(), report.retained.len());
        }
        SyncOutcome::Notified(clients) => println!("notified {} clients", clients),
        SyncOutcome::Ignored => println!("unknown sync tag {}", tag),
      }
    }
    Command::Enqueue { message } => {
      let body = serde_json::from_str(&message).map_err(|e| eyre!("Invalid message JSON: {}", e))?;
      let message = worker.enqueue(body)?;
      println!("{}", message.id);
    }
    Command::CacheUrls { urls } => {
      let stored = worker.cache_urls(&urls).await?;
      println!("cached {} of {} urls", stored, urls.len());
    }
    Command::ClearCache { name } => {
      worker
        .handle_message(ClientMessage::ClearCache { cache_name: name })
        .await?;
    }
    Command::CacheSize => {
      println!("{}", worker.cache_size()?);
    }
  }

  Ok(())
}
