mod cache;
mod commands;
mod config;
mod logging;
mod net;

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};

use cache::{
  CacheResult, CacheSource, CacheStorage, CachedResponse, Destination, PolicyContext,
  PolicyEngine, Request, SqliteStorage, SysfsOracle,
};
use commands::{ControlCommand, OptimizeOptions, COMMANDS};
use net::{Fetcher, HttpClient};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first HTTP resource cache with tiered, power-aware admission")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Open the cache tiers and pre-populate the bootstrap list
  Install,
  /// Delete cache tiers left over from older generations
  Activate,
  /// Request a URL through the cache
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    /// Treat the request as a top-level document navigation
    #[arg(long)]
    navigate: bool,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write the body to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Send a control command (lists commands when no name is given)
  Control {
    /// Command name or alias
    name: Option<String>,
    /// Raw control message, e.g. '{"type": "BATTERY_SAVE"}'
    #[arg(long, conflicts_with = "name")]
    json: Option<String>,
    /// Entry limit for optimize
    #[arg(long)]
    max_items: Option<usize>,
    /// Make optimize leave the cache size alone
    #[arg(long)]
    no_limit: bool,
  },
  /// Show stored tiers and their entry counts
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let ctx = PolicyContext::from_config(&config)?;
  let storage = SqliteStorage::open(config.storage.path.as_deref())?;
  let client = HttpClient::new(&config.network)?;
  let oracle = SysfsOracle::new(&config.power);
  let engine = PolicyEngine::new(ctx, storage, client.clone(), oracle);

  match args.command {
    Cmd::Install => {
      let count = engine.handle_install().await?;
      eprintln!("Installed: {} bootstrap resources cached", count);
    }
    Cmd::Activate => {
      let removed = engine.handle_activate()?;
      if removed.is_empty() {
        eprintln!("Activated: no outdated tiers");
      } else {
        eprintln!("Activated: removed {}", removed.join(", "));
      }
    }
    Cmd::Fetch {
      url,
      navigate,
      method,
      output,
    } => {
      let destination = if navigate {
        Destination::Document
      } else {
        Destination::Subresource
      };
      let request = Request::new(&method, config.resolve(&url)?, destination);

      let result = if request.is_interceptable() {
        engine.handle_request(&request).await?
      } else {
        // Not ours to cache; pass straight through
        CacheResult::from_network(client.fetch(&request).await?)
      };

      report_fetch(&request, &result);
      write_body(&result.data, output)?;
    }
    Cmd::Control {
      name,
      json,
      max_items,
      no_limit,
    } => {
      let command = match (json, name) {
        (Some(message), _) => ControlCommand::from_message(&message)?,
        (None, Some(name)) => {
          let defaults = OptimizeOptions::default();
          let options = OptimizeOptions {
            limit_cache_size: !no_limit,
            max_items: max_items.unwrap_or(defaults.max_items),
            ..defaults
          };
          ControlCommand::from_name(&name, options)?
        }
        (None, None) => {
          for cmd in COMMANDS {
            println!("{:<10} {:<40} ({})", cmd.name, cmd.description, cmd.aliases.join(", "));
          }
          return Ok(());
        }
      };

      let reply = engine.handle_command(command).await?;
      let rendered = serde_json::to_string_pretty(&reply)
        .map_err(|e| eyre!("Failed to render reply: {}", e))?;
      println!("{}", rendered);
    }
    Cmd::Status => {
      let ctx = engine.context();
      for tier in engine.storage().tier_names()? {
        let count = engine.storage().entry_count(&tier)?;
        let capacity = ctx
          .tiers()
          .into_iter()
          .find(|t| t.name == tier)
          .map(|t| match t.capacity {
            0 => "unbounded".to_string(),
            n => format!("max {}", n),
          })
          .unwrap_or_else(|| "not configured".to_string());
        println!("{:<24} {:>6} entries  ({})", tier, count, capacity);
      }
    }
  }

  Ok(())
}

fn report_fetch(request: &Request, result: &CacheResult<CachedResponse>) {
  let age = match (result.source, result.cached_at) {
    (CacheSource::Network, _) | (_, None) => String::new(),
    (_, Some(at)) => format!(", cached {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
  };
  eprintln!(
    "{} {} [{}{}]",
    result.data.status, request.url, result.source, age
  );
}

fn write_body(response: &CachedResponse, output: Option<PathBuf>) -> Result<()> {
  match output {
    Some(path) => std::fs::write(&path, &response.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e)),
    None => {
      let mut stdout = std::io::stdout().lock();
      stdout
        .write_all(&response.body)
        .and_then(|_| stdout.flush())
        .map_err(|e| eyre!("Failed to write body: {}", e))
    }
  }
}
