mod app;
mod config;
mod event;
mod logging;
mod query;
mod ui;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use offsync::connectivity::Connectivity;
use offsync::observer::SyncObserver;
use offsync::remote::{RemoteBackend, RestBackend};
use offsync::store::{OperationKind, SqliteStore};
use offsync::sync::{SyncManager, SyncOutcome};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::logging::LogTarget;

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline-first write queue with background sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Start in offline mode; nothing is sent until you go online
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Interactive dashboard (default)
  Dashboard,
  /// Queue a write; it is sent on the next sync
  Queue {
    table: String,
    /// insert, update or delete
    operation: OperationKind,
    /// JSON object for insert/update, record id for delete
    payload: String,
  },
  /// Run one sync pass and print the result
  Sync,
  /// Print queue counts and the last sync time
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let command = args.command.unwrap_or(Command::Dashboard);

  let config = Config::load(args.config.as_deref())?;

  let _log_guard = match command {
    Command::Dashboard => logging::init(LogTarget::File(logging::default_dir()?))?,
    _ => logging::init(LogTarget::Stderr)?,
  };

  let store = match &config.storage.path {
    Some(path) => SqliteStore::open(path)?,
    None => SqliteStore::open_default()?,
  }
  .with_max_retries(config.sync.max_retries);

  let remote: Arc<dyn RemoteBackend> = Arc::new(RestBackend::new(
    &config.backend.url,
    &config.backend.rest_path,
    Config::get_api_key()?,
  )?);

  // Offline until the first probe says otherwise
  let connectivity = Connectivity::new(false);
  connectivity.set_forced_offline(args.offline);

  let manager = SyncManager::new(
    Arc::new(store),
    remote.clone(),
    connectivity.clone(),
    config.sync.settings(),
  );

  match command {
    Command::Dashboard => {
      let purged = manager.purge_expired_cache()?;
      tracing::debug!(purged, "Purged expired cache entries");

      let _probe = connectivity.spawn_probe(
        remote.clone(),
        config.sync.probe_interval(),
        config.sync.request_timeout(),
      );
      let observer = SyncObserver::spawn(manager.clone(), config.sync.poll_interval());
      let root = ui::views::QueueView::new(manager, remote, config.sync.request_timeout());

      let mut app = app::App::new(config.display_title(), observer, Box::new(root));
      app.run().await?;
    }
    Command::Queue {
      table,
      operation,
      payload,
    } => {
      let id = match operation {
        OperationKind::Insert => manager.queue_insert(&table, parse_json(&payload)?)?,
        OperationKind::Update => manager.queue_update(&table, parse_json(&payload)?)?,
        OperationKind::Delete => manager.queue_delete(&table, &payload)?,
      };
      println!("Queued {} on {} ({})", operation, table, id);
    }
    Command::Sync => {
      if args.offline {
        return Err(eyre!("Refusing to sync in offline mode"));
      }
      if !connectivity
        .probe(remote.as_ref(), config.sync.request_timeout())
        .await
      {
        println!(
          "Backend unreachable; {} operations stay queued",
          manager.pending_count()?
        );
        return Ok(());
      }

      match manager.sync().await? {
        SyncOutcome::Skipped => println!("Another sync is already running; try again shortly"),
        SyncOutcome::Offline => println!("Offline; nothing was sent"),
        SyncOutcome::Completed(report) => {
          println!("{}", report.summary());
          if report.exhausted > 0 {
            println!(
              "{} operations ran out of retries; open the dashboard to review them",
              report.exhausted
            );
          }
        }
      }
    }
    Command::Status => {
      println!("Pending: {}", manager.pending_count()?);
      println!("Failed:  {}", manager.failed_count()?);
      match manager.get_last_sync_time() {
        Some(at) => println!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last sync: never"),
      }
    }
  }

  Ok(())
}

fn parse_json(payload: &str) -> Result<serde_json::Value> {
  serde_json::from_str(payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))
}
