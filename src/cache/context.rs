//! Explicit policy context threaded through the engine in place of globals.

use std::time::Duration;

use color_eyre::Result;

use super::classify::{Classifier, ResourceClass};
use crate::config::Config;

/// A named tier and its entry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSpec {
  pub name: String,
  /// Maximum entry count, 0 = unbounded
  pub capacity: usize,
}

impl TierSpec {
  pub fn new(name: &str, capacity: usize) -> Self {
    Self {
      name: name.to_string(),
      capacity,
    }
  }

  pub fn is_bounded(&self) -> bool {
    self.capacity > 0
  }
}

/// Everything the engine needs to know about tiers, URLs and thresholds.
#[derive(Debug, Clone)]
pub struct PolicyContext {
  /// Cache generation identifier
  pub generation: String,
  pub static_tier: TierSpec,
  pub dynamic_tier: TierSpec,
  /// Tier names probed on lookup, in order
  pub lookup_order: Vec<String>,
  /// Absolute URL of the application shell document
  pub root_document: String,
  /// Absolute URLs pre-populated on install
  pub bootstrap: Vec<String>,
  pub classifier: Classifier,
  pub low_battery_threshold: f32,
  pub fetch_timeout: Duration,
}

impl PolicyContext {
  pub fn from_config(config: &Config) -> Result<Self> {
    let bootstrap = config
      .bootstrap
      .iter()
      .map(|url| config.resolve(url))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      generation: config.generation.clone(),
      static_tier: TierSpec::new(
        &config.tiers.static_tier.name,
        config.tiers.static_tier.capacity,
      ),
      dynamic_tier: TierSpec::new(
        &config.tiers.dynamic_tier.name,
        config.tiers.dynamic_tier.capacity,
      ),
      lookup_order: config.lookup_order(),
      root_document: config.resolve(&config.root_document)?,
      bootstrap,
      classifier: Classifier::new(&config.classifier),
      low_battery_threshold: config.power.low_battery_threshold,
      fetch_timeout: Duration::from_secs(config.network.timeout_secs),
    })
  }

  /// Tier an admitted response of this class is written to.
  pub fn tier_for(&self, class: ResourceClass) -> &TierSpec {
    match class {
      ResourceClass::Static => &self.static_tier,
      ResourceClass::Dynamic => &self.dynamic_tier,
    }
  }

  pub fn tiers(&self) -> [&TierSpec; 2] {
    [&self.static_tier, &self.dynamic_tier]
  }

  /// Tier names that survive activation.
  pub fn recognized_tiers(&self) -> Vec<&str> {
    vec![
      self.static_tier.name.as_str(),
      self.dynamic_tier.name.as_str(),
      self.generation.as_str(),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_config_resolves_urls() {
    let config = Config::from_yaml(
      r#"
origin: "https://app.example/app/"
bootstrap: ["./", "./index.html", "https://cdn.tailwindcss.com/2.2.19/tailwind.min.css"]
"#,
    )
    .unwrap();

    let ctx = PolicyContext::from_config(&config).unwrap();

    assert_eq!(ctx.root_document, "https://app.example/app/index.html");
    assert_eq!(
      ctx.bootstrap,
      vec![
        "https://app.example/app/".to_string(),
        "https://app.example/app/index.html".to_string(),
        "https://cdn.tailwindcss.com/2.2.19/tailwind.min.css".to_string(),
      ]
    );
    assert_eq!(ctx.fetch_timeout, Duration::from_secs(15));
    assert!(!ctx.static_tier.is_bounded());
    assert!(ctx.dynamic_tier.is_bounded());
  }

  #[test]
  fn test_tier_for_class() {
    let config = Config::from_yaml("origin: \"https://app.example/\"").unwrap();
    let ctx = PolicyContext::from_config(&config).unwrap();

    assert_eq!(ctx.tier_for(ResourceClass::Static).name, "static-cache-v1");
    assert_eq!(ctx.tier_for(ResourceClass::Dynamic).name, "dynamic-cache-v1");
    assert_eq!(
      ctx.recognized_tiers(),
      vec!["static-cache-v1", "dynamic-cache-v1", "shellcache-v1"]
    );
  }
}
