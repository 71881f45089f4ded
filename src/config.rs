use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL that relative bootstrap entries and CLI arguments resolve against
  pub origin: String,
  /// Cache generation identifier reported by GET_VERSION and kept on activation
  #[serde(default = "default_generation")]
  pub generation: String,
  /// Entry point served to navigation requests when nothing else is available
  #[serde(default = "default_root_document")]
  pub root_document: String,
  /// URLs pre-populated into the static tier on install
  #[serde(default = "default_bootstrap")]
  pub bootstrap: Vec<String>,
  #[serde(default)]
  pub tiers: TiersConfig,
  /// Tier names probed on lookup, in order (defaults to static then dynamic)
  #[serde(default)]
  pub lookup_order: Option<Vec<String>>,
  #[serde(default)]
  pub classifier: ClassifierConfig,
  #[serde(default)]
  pub power: PowerConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
  pub name: String,
  /// Maximum entry count, 0 = unbounded
  #[serde(default)]
  pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TiersConfig {
  #[serde(rename = "static", default = "default_static_tier")]
  pub static_tier: TierConfig,
  #[serde(rename = "dynamic", default = "default_dynamic_tier")]
  pub dynamic_tier: TierConfig,
}

impl Default for TiersConfig {
  fn default() -> Self {
    Self {
      static_tier: default_static_tier(),
      dynamic_tier: default_dynamic_tier(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
  /// Substrings marking a URL as a static resource (cache-first)
  #[serde(default = "default_static_patterns")]
  pub static_patterns: Vec<String>,
  /// Substrings still admitted while the device is in low-power state
  #[serde(default = "default_essential_patterns")]
  pub essential_patterns: Vec<String>,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      static_patterns: default_static_patterns(),
      essential_patterns: default_essential_patterns(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
  /// Detect from network interface state
  #[default]
  Auto,
  /// Always report online
  Online,
  /// Always report offline
  Offline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PowerConfig {
  /// Battery level (0.0 - 1.0) below which a discharging device is low-power
  #[serde(default = "default_low_battery_threshold")]
  pub low_battery_threshold: f32,
  #[serde(default)]
  pub connectivity: Connectivity,
  /// Root of the sysfs class tree (power_supply, net)
  #[serde(default = "default_sysfs_root")]
  pub sysfs_root: PathBuf,
}

impl Default for PowerConfig {
  fn default() -> Self {
    Self {
      low_battery_threshold: default_low_battery_threshold(),
      connectivity: Connectivity::default(),
      sysfs_root: default_sysfs_root(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
      user_agent: default_user_agent(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/shellcache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Default filter directive, overridden by RUST_LOG
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Also write a daily-rolling log file under the data directory
  #[serde(default)]
  pub file: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: false,
    }
  }
}

fn default_generation() -> String {
  "shellcache-v1".to_string()
}

fn default_root_document() -> String {
  "./index.html".to_string()
}

fn default_bootstrap() -> Vec<String> {
  vec![
    "./".to_string(),
    "./index.html".to_string(),
    "./manifest.json".to_string(),
  ]
}

fn default_static_tier() -> TierConfig {
  TierConfig {
    name: "static-cache-v1".to_string(),
    capacity: 0,
  }
}

fn default_dynamic_tier() -> TierConfig {
  TierConfig {
    name: "dynamic-cache-v1".to_string(),
    capacity: 20,
  }
}

fn default_static_patterns() -> Vec<String> {
  [
    ".html",
    ".css",
    ".js",
    ".png",
    ".jpg",
    ".svg",
    "tailwindcss",
    "manifest.json",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_essential_patterns() -> Vec<String> {
  ["index.html", "tailwindcss", "manifest.json"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_low_battery_threshold() -> f32 {
  0.2
}

fn default_sysfs_root() -> PathBuf {
  PathBuf::from("/sys/class")
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_user_agent() -> String {
  concat!("shellcache/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shellcache/config.yaml\n\
                 At minimum it needs an `origin:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;

    let static_name = &self.tiers.static_tier.name;
    let dynamic_name = &self.tiers.dynamic_tier.name;
    if static_name == dynamic_name {
      return Err(eyre!(
        "Static and dynamic tiers must have distinct names (both are '{}')",
        static_name
      ));
    }

    for name in self.lookup_order() {
      if &name != static_name && &name != dynamic_name {
        return Err(eyre!("lookup_order names unknown tier '{}'", name));
      }
    }

    if !(0.0..=1.0).contains(&self.power.low_battery_threshold) {
      return Err(eyre!(
        "power.low_battery_threshold must be within 0.0..=1.0, got {}",
        self.power.low_battery_threshold
      ));
    }

    if self.network.timeout_secs == 0 {
      return Err(eyre!("network.timeout_secs must be at least 1"));
    }

    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a possibly relative URL against the configured origin.
  pub fn resolve(&self, target: &str) -> Result<String> {
    let origin = self.origin_url()?;
    origin
      .join(target)
      .map(String::from)
      .map_err(|e| eyre!("Cannot resolve '{}' against {}: {}", target, origin, e))
  }

  /// Tier names probed on lookup.
  pub fn lookup_order(&self) -> Vec<String> {
    self.lookup_order.clone().unwrap_or_else(|| {
      vec![
        self.tiers.static_tier.name.clone(),
        self.tiers.dynamic_tier.name.clone(),
      ]
    })
  }

  /// Directory for the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache"))
  }
}
