//! Remote control commands and name lookup.
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{CacheStorage, EvictionReport, PolicyEngine, PowerOracle};
use crate::net::Fetcher;

/// Dynamic tier limit applied by MOBILE_OPTIMIZE unless overridden
pub const MOBILE_OPTIMIZE_LIMIT: usize = 15;
/// Dynamic tier limit applied by BATTERY_SAVE
pub const BATTERY_SAVE_LIMIT: usize = 10;

/// A message received over the control channel.
///
/// Wire form is a JSON object tagged by `type`, e.g.
/// `{"type": "MOBILE_OPTIMIZE", "options": {"maxItems": 12}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommand {
  GetVersion,
  MobileOptimize {
    #[serde(default)]
    options: OptimizeOptions,
  },
  BatterySave,
  ClearCache,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizeOptions {
  pub reduce_bandwidth: bool,
  pub optimize_images: bool,
  /// Trim the dynamic tier
  pub limit_cache_size: bool,
  pub max_items: usize,
}

impl Default for OptimizeOptions {
  fn default() -> Self {
    Self {
      reduce_bandwidth: true,
      optimize_images: true,
      limit_cache_size: true,
      max_items: MOBILE_OPTIMIZE_LIMIT,
    }
  }
}

/// Reply sent back over the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
  Version {
    version: String,
    cached: Vec<String>,
    mobile: bool,
  },
  Trimmed {
    tier: String,
    #[serde(flatten)]
    report: EvictionReport,
  },
  Unchanged {
    tier: String,
  },
  Cleared {
    tier: String,
  },
}

impl ControlCommand {
  /// Parse a JSON control message.
  pub fn from_message(message: &str) -> Result<Self> {
    serde_json::from_str(message).map_err(|e| eyre!("Invalid control message: {}", e))
  }

  /// Resolve a command name or alias as typed on the command line.
  pub fn from_name(name: &str, options: OptimizeOptions) -> Result<Self> {
    let input = name.to_lowercase();
    let spec = COMMANDS
      .iter()
      .find(|cmd| cmd.name == input || cmd.aliases.contains(&input.as_str()));

    match spec.map(|cmd| cmd.name) {
      Some("version") => Ok(Self::GetVersion),
      Some("optimize") => Ok(Self::MobileOptimize { options }),
      Some("battery") => Ok(Self::BatterySave),
      Some("clear") => Ok(Self::ClearCache),
      _ => {
        let hints: Vec<&str> = get_suggestions(&input).iter().map(|c| c.name).collect();
        if hints.is_empty() {
          Err(eyre!("Unknown command '{}'", name))
        } else {
          Err(eyre!(
            "Unknown command '{}'. Did you mean: {}?",
            name,
            hints.join(", ")
          ))
        }
      }
    }
  }
}

impl<S, F, O> PolicyEngine<S, F, O>
where
  S: CacheStorage,
  F: Fetcher,
  O: PowerOracle,
{
  pub async fn handle_command(&self, command: ControlCommand) -> Result<ControlReply> {
    let ctx = self.context();
    let dynamic = ctx.dynamic_tier.name.clone();

    match command {
      ControlCommand::GetVersion => Ok(ControlReply::Version {
        version: ctx.generation.clone(),
        cached: ctx.bootstrap.clone(),
        mobile: true,
      }),
      ControlCommand::MobileOptimize { options } => {
        info!(?options, "Mobile optimization requested");
        if !options.limit_cache_size {
          return Ok(ControlReply::Unchanged { tier: dynamic });
        }
        let report = self.enforce_tier_limit(&dynamic, options.max_items).await?;
        Ok(ControlReply::Trimmed {
          tier: dynamic,
          report,
        })
      }
      ControlCommand::BatterySave => {
        info!("Battery save requested");
        let report = self
          .enforce_tier_limit(&dynamic, BATTERY_SAVE_LIMIT)
          .await?;
        Ok(ControlReply::Trimmed {
          tier: dynamic,
          report,
        })
      }
      ControlCommand::ClearCache => {
        {
          let _guard = self.lock_tier(&dynamic).await?;
          self.storage().clear(&dynamic)?;
        }
        info!(tier = %dynamic, "Dynamic cache cleared");
        Ok(ControlReply::Cleared { tier: dynamic })
      }
    }
  }
}

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "version",
    aliases: &["v", "get_version", "get-version"],
    description: "Show cache generation and bootstrap list",
  },
  Command {
    name: "optimize",
    aliases: &["o", "mobile", "mobile_optimize", "mobile-optimize"],
    description: "Trim the dynamic cache for mobile use",
  },
  Command {
    name: "battery",
    aliases: &["b", "save", "battery_save", "battery-save"],
    description: "Trim the dynamic cache to save battery",
  },
  Command {
    name: "clear",
    aliases: &["c", "clear_cache", "clear-cache"],
    description: "Empty the dynamic cache",
  },
];

/// Get suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    // Fuzzy match on alias
    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}
