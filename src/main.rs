mod cache;
mod commands;
mod config;
mod console;
mod logging;
mod monitor;
mod net;
mod worker;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::cache::{Request, SqliteStorage};
use crate::config::Config;
use crate::console::ConsoleHost;
use crate::monitor::{CheckOutcome, Exit, PageEvent, Trigger, VersionMonitor};
use crate::net::HttpNetwork;
use crate::worker::{Registration, UpdateOutcome, WorkerSettings};

type AppRegistration = Registration<SqliteStorage, HttpNetwork>;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Versioned offline cache worker and deployment version monitor")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to a daily rolling file in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Install a worker version and activate it
  Install {
    /// Version to install (defaults to the configured build version)
    #[arg(long)]
    version: Option<String>,
  },
  /// Send one request through the active worker
  Fetch {
    /// Path on the origin, e.g. /static/js/app.js
    path: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// Request as a document navigation (accept: text/html)
    #[arg(long)]
    html: bool,
    /// Page id issuing the request
    #[arg(long)]
    client: Option<u64>,
  },
  /// List cache partitions
  Partitions,
  /// Delete every cache partition
  Clear,
  /// Compare the configured version with the server's once
  Check,
  /// Run the version monitor, reading page events from stdin
  Watch {
    /// Tab session id; dismissed updates are remembered per session
    #[arg(long, default_value = "default")]
    session: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_dir.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = Arc::new(HttpNetwork::new(config.cache.request_timeout())?);
  let registration = Arc::new(Registration::new(
    WorkerSettings::new(config.origin.clone(), config.cache.clone()),
    Arc::clone(&storage),
    Arc::clone(&network),
  ));

  match args.command {
    Cmd::Install { version } => {
      let version = version.unwrap_or_else(|| config.version.clone());
      install(&registration, &version).await
    }
    Cmd::Fetch {
      path,
      method,
      html,
      client,
    } => fetch(&config, &registration, &path, &method, html, client).await,
    Cmd::Partitions => {
      for (name, entries) in registration.partitions()? {
        println!("{:<40} {:>6} entries", name, entries);
      }
      Ok(())
    }
    Cmd::Clear => {
      let (handle, _task) = worker::channel::spawn(Arc::clone(&registration));
      let ack = handle.clear_caches().await?;
      if !ack.success {
        return Err(eyre!("Worker failed to clear caches"));
      }
      println!("Removed {} partitions", ack.removed);
      Ok(())
    }
    Cmd::Check => {
      let (handle, _task) = worker::channel::spawn(Arc::clone(&registration));
      let mut monitor = VersionMonitor::new(
        &config,
        Arc::clone(&network),
        ConsoleHost,
        Arc::clone(&storage),
        "check",
        handle,
      )?;
      monitor.on_load();
      match monitor.check(Trigger::Manual).await {
        CheckOutcome::UpToDate => println!("Up to date ({})", config.version),
        CheckOutcome::Inconclusive => println!("Version endpoint did not give an answer"),
        CheckOutcome::Throttled => println!("Checked too recently"),
        CheckOutcome::Dismissed { version } => {
          println!("Server runs {}, dismissed earlier in this session", version)
        }
        CheckOutcome::UpdateAvailable { version, decision } => {
          println!(
            "Server runs {} (local {}), decision: {:?}",
            version, config.version, decision
          )
        }
      }
      Ok(())
    }
    Cmd::Watch { session } => watch(&config, registration, network, storage, &session).await,
  }
}

async fn install(registration: &AppRegistration, version: &str) -> Result<()> {
  match registration.update(version).await? {
    UpdateOutcome::Activated {
      install,
      activation,
    } => {
      println!(
        "Installed {} into {} ({} cached, {} failed)",
        version,
        install.partition,
        install.cached,
        install.failed.len()
      );
      for path in &install.failed {
        println!("  not cached: {}", path);
      }
      println!("Activated; removed {} stale partitions", activation.deleted.len());
    }
    UpdateOutcome::Waiting { install } => {
      println!("Installed {} into {}, waiting", version, install.partition)
    }
    UpdateOutcome::Unchanged => println!("{} already installed", version),
  }
  Ok(())
}

/// Make sure the configured version controls requests, installing it if an
/// earlier run did not.
async fn ensure_controller(registration: &AppRegistration, version: &str) -> Result<()> {
  if registration.resume(version)?.is_none() {
    registration.update(version).await?;
  }
  Ok(())
}

async fn fetch(
  config: &Config,
  registration: &AppRegistration,
  path: &str,
  method: &str,
  html: bool,
  client: Option<u64>,
) -> Result<()> {
  ensure_controller(registration, &config.version).await?;

  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
  let url = config
    .origin
    .join(path)
    .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;

  let mut request = Request::new(method, url);
  if html {
    request = request.with_header("accept", "text/html");
  }
  if let Some(client) = client {
    request = request.with_client(client);
  }

  let served = registration.handle_fetch(request).await?;
  println!(
    "{} {} ({} bytes) from {}",
    served.response.status,
    path,
    served.response.body.len(),
    served.source
  );
  if let Some(cached_at) = served.cached_at {
    println!("cached at {}", cached_at);
  }
  Ok(())
}

async fn watch(
  config: &Config,
  registration: Arc<AppRegistration>,
  network: Arc<HttpNetwork>,
  storage: Arc<SqliteStorage>,
  session: &str,
) -> Result<()> {
  ensure_controller(&registration, &config.version).await?;
  let (handle, _task) = worker::channel::spawn(Arc::clone(&registration));

  let monitor = VersionMonitor::new(config, network, ConsoleHost, storage, session, handle)?;
  let unsaved = monitor.unsaved_changes();
  let (events_tx, events_rx) = mpsc::unbounded_channel();

  // Page side of the claim handshake
  let mut changes = registration.subscribe();
  let controller_tx = events_tx.clone();
  let forwarder = tokio::spawn(async move {
    loop {
      match changes.recv().await {
        Ok(change) => {
          let event = PageEvent::ControllerChanged {
            version: change.version,
          };
          if controller_tx.send(event).is_err() {
            break;
          }
        }
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  });

  println!(
    "Watching {} (local version {}); type help for commands",
    config.origin, config.version
  );

  let exit = tokio::select! {
    exit = monitor.run(events_rx) => exit,
    _ = console::read_stdin(events_tx, unsaved) => Exit::Closed,
  };
  forwarder.abort();

  match exit {
    Exit::Reloaded { .. } => println!("Page reloaded; start watch again with the new build"),
    Exit::Closed => println!("Page closed"),
  }
  Ok(())
}
