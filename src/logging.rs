use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `offsync=debug`.
const LOG_ENV: &str = "OFFSYNC_LOG";

/// Where log output goes.
pub enum LogTarget {
  /// Daily rolling files in the given directory. The terminal belongs to the TUI.
  File(PathBuf),
  Stderr,
}

fn filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Default log directory: $XDG_DATA_HOME/offsync/logs
pub fn default_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .map(|dir| dir.join("offsync").join("logs"))
    .ok_or_else(|| eyre!("Could not determine data directory"))
}

/// Install the global subscriber.
///
/// The returned guard flushes buffered file output when dropped; keep it alive
/// until the program exits.
pub fn init(target: LogTarget) -> Result<Option<WorkerGuard>> {
  match target {
    LogTarget::File(dir) => {
      let (writer, guard) = file_writer(&dir)?;
      tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
    LogTarget::Stderr => {
      tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
  }
}

fn file_writer(dir: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
  let appender = tracing_appender::rolling::daily(dir, "offsync.log");
  Ok(tracing_appender::non_blocking(appender))
}
