mod cache;
mod config;
mod host;
mod logging;
mod net;
mod proxy;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use cache::{CacheStorage, SqliteStorage};
use config::Config;
use host::WorkerHost;
use net::{HttpNetwork, Network, Request, Response};
use worker::{FetchOutcome, OfflineWorker};

#[derive(Parser, Debug)]
#[command(name = "dossier-offline")]
#[command(about = "Network-first offline cache in front of the dossier web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dossier-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin, overriding the config file
  #[arg(long)]
  origin: Option<String>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifest into the current version's store
  Install,
  /// Delete every store except the current version's
  Activate,
  /// Run one request through the worker and print the body
  Fetch {
    /// Path on the origin or absolute URL
    target: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// List cache stores and their entries
  Caches,
  /// Delete every cache store
  Clear,
  /// Install, activate and serve the offline proxy
  Serve {
    /// Listen address, overriding the config file
    #[arg(short, long)]
    listen: Option<SocketAddr>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    let config = Config { origin, ..config };
    config.validate()?;
    config
  } else {
    config
  };

  let storage: Arc<dyn CacheStorage> = Arc::new(match &config.database {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open_default()?,
  });
  let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(&config.network)?);
  let origin = config.origin_url()?;

  let worker = OfflineWorker::new(
    config.cache_version.clone(),
    origin.clone(),
    config.manifest()?,
    network.clone(),
    storage.clone(),
  )
  .with_skip_waiting(config.skip_waiting);

  match args.command {
    Command::Install => {
      let report = worker.install().await?;
      println!("{}: {} assets precached", report.cache_name, report.cached);
    }
    Command::Activate => {
      // Refuses to run unless this version's store is complete
      let report = worker.activate().await?;
      for name in &report.deleted {
        println!("deleted {}", name);
      }
      println!("{} active", report.cache_name);
    }
    Command::Fetch {
      target,
      method,
      navigate,
    } => {
      let request = fetch_request(&origin, &target, &method, navigate)?;
      let response = match worker.handle_fetch(&request).await? {
        FetchOutcome::Respond { response, source } => {
          info!(
            url = %request.url,
            status = response.status,
            content_type = ?response.header("content-type"),
            source = %source,
            "fetch"
          );
          response
        }
        FetchOutcome::Passthrough => {
          info!(url = %request.url, "not intercepted, sending to network");
          network.fetch(&request).await?
        }
      };
      write_body(&response)?;
    }
    Command::Caches => {
      for name in storage.keys()? {
        let marker = if name == config.cache_version { " (current)" } else { "" };
        println!("{}{}", name, marker);
        for entry in storage.entries(&name)? {
          println!(
            "  {} {} {} {}B {}",
            entry.method,
            entry.url,
            entry.status,
            entry.size,
            entry.cached_at.format("%Y-%m-%d %H:%M:%S")
          );
        }
      }
    }
    Command::Clear => {
      for name in storage.keys()? {
        storage.delete(&name)?;
        println!("deleted {}", name);
      }
    }
    Command::Serve { listen } => {
      let host = Arc::new(WorkerHost::new());
      match host.start(worker).await {
        Ok(registration) => {
          if registration.activate.is_none() {
            host.promote_waiting().await?;
          }
          info!(
            version = %registration.version,
            precached = ?registration.install.as_ref().map(|r| r.cached),
            claimed = host.clients_claimed(),
            "worker in control"
          );
        }
        // Nothing to serve offline yet; keep proxying so the app stays reachable
        Err(e) => warn!(error = %e, "no worker installed, passing every request through"),
      }

      let state = Arc::new(proxy::ProxyState {
        host,
        network,
        origin,
      });
      proxy::serve(listen.unwrap_or(config.listen), state).await?;
    }
  }

  Ok(())
}

/// Build the request for the `fetch` command.
fn fetch_request(origin: &Url, target: &str, method: &str, navigate: bool) -> Result<Request> {
  let url = match Url::parse(target) {
    Ok(url) => url,
    Err(_) => origin
      .join(target)
      .map_err(|e| eyre!("Invalid target '{}': {}", target, e))?,
  };
  let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
  let request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };

  Ok(request.with_method(method))
}

fn write_body(response: &Response) -> Result<()> {
  let mut stdout = std::io::stdout().lock();
  stdout.write_all(&response.body)?;
  stdout.flush()?;
  Ok(())
}
