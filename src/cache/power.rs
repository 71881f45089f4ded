//! Power and connectivity oracle.
//!
//! The engine reads a fresh [`PowerState`] for every request. Failing to read
//! battery information is never an error: the fields are simply absent and the
//! engine behaves as on mains power.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{Connectivity, PowerConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerState {
  /// Battery level in 0.0 - 1.0, if known
  pub battery_level: Option<f32>,
  /// Whether the battery is charging, if known
  pub charging: Option<bool>,
  pub online: bool,
}

impl PowerState {
  pub fn is_low_power(&self, threshold: f32) -> bool {
    is_low_power(self, threshold)
  }
}

#[cfg(test)]
impl PowerState {
  pub fn online() -> Self {
    Self {
      battery_level: None,
      charging: None,
      online: true,
    }
  }

  pub fn offline() -> Self {
    Self {
      online: false,
      ..Self::online()
    }
  }

  pub fn with_battery(mut self, level: f32, charging: bool) -> Self {
    self.battery_level = Some(level);
    self.charging = Some(charging);
    self
  }
}

/// Low power iff the level is known, below `threshold`, and not charging.
///
/// An unknown level is never low power. An unknown charging flag with a known
/// low level counts as discharging.
pub fn is_low_power(state: &PowerState, threshold: f32) -> bool {
  match state.battery_level {
    Some(level) => level < threshold && state.charging != Some(true),
    None => false,
  }
}

/// Source of environment facts consulted by the policy engine.
pub trait PowerOracle: Send + Sync {
  fn current_power_state(&self) -> PowerState;
}

/// Reads battery and link state from the Linux sysfs class tree.
#[derive(Debug, Clone)]
pub struct SysfsOracle {
  root: PathBuf,
  connectivity: Connectivity,
}

impl SysfsOracle {
  pub fn new(config: &PowerConfig) -> Self {
    Self {
      root: config.sysfs_root.clone(),
      connectivity: config.connectivity,
    }
  }

  fn battery(&self) -> (Option<f32>, Option<bool>) {
    let supplies = self.root.join("power_supply");
    let Ok(entries) = fs::read_dir(&supplies) else {
      debug!("No power supply information at {}", supplies.display());
      return (None, None);
    };

    for entry in entries.flatten() {
      let dir = entry.path();
      if read_trimmed(&dir.join("type")).as_deref() != Some("Battery") {
        continue;
      }

      let level = read_trimmed(&dir.join("capacity"))
        .and_then(|s| s.parse::<f32>().ok())
        .map(|pct| (pct / 100.0).clamp(0.0, 1.0));
      let charging = read_trimmed(&dir.join("status")).and_then(|s| match s.as_str() {
        "Charging" | "Full" => Some(true),
        "Discharging" | "Not charging" => Some(false),
        _ => None,
      });

      return (level, charging);
    }

    (None, None)
  }

  fn link_up(&self) -> bool {
    let net = self.root.join("net");
    let Ok(entries) = fs::read_dir(&net) else {
      // Can't tell; assume online rather than degrade
      return true;
    };

    entries.flatten().any(|entry| {
      entry.file_name() != "lo"
        && read_trimmed(&entry.path().join("operstate")).as_deref() == Some("up")
    })
  }
}

impl PowerOracle for SysfsOracle {
  fn current_power_state(&self) -> PowerState {
    let online = match self.connectivity {
      Connectivity::Online => true,
      Connectivity::Offline => false,
      Connectivity::Auto => self.link_up(),
    };
    let (battery_level, charging) = self.battery();

    PowerState {
      battery_level,
      charging,
      online,
    }
  }
}

fn read_trimmed(path: &Path) -> Option<String> {
  fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
