//! URL classification: which tier a resource belongs to and whether it is
//! worth admitting when power is scarce.

use crate::config::ClassifierConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Versioned by deployment; served cache-first
  Static,
  /// Served network-first
  Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
  /// Admitted even in low-power state
  Essential,
  /// Admitted only under normal power
  Optional,
}

#[derive(Debug, Clone)]
pub struct Classifier {
  static_patterns: Vec<String>,
  essential_patterns: Vec<String>,
}

impl Classifier {
  pub fn new(config: &ClassifierConfig) -> Self {
    Self {
      static_patterns: config.static_patterns.clone(),
      essential_patterns: config.essential_patterns.clone(),
    }
  }

  /// Any pattern found anywhere in the URL makes it static.
  pub fn classify(&self, url: &str) -> ResourceClass {
    if contains_any(url, &self.static_patterns) {
      ResourceClass::Static
    } else {
      ResourceClass::Dynamic
    }
  }

  pub fn admission(&self, url: &str) -> Admission {
    if contains_any(url, &self.essential_patterns) {
      Admission::Essential
    } else {
      Admission::Optional
    }
  }

  pub fn should_cache(&self, url: &str, low_power: bool) -> bool {
    !low_power || self.admission(url) == Admission::Essential
  }
}

fn contains_any(url: &str, patterns: &[String]) -> bool {
  patterns.iter().any(|p| url.contains(p.as_str()))
}
