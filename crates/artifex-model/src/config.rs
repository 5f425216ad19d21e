//! Engine configuration.
//!
//! Every field has a default so a config file only needs the values it
//! changes:
//!
//! ```json
//! {
//!   "cache": { "max_entries": 200, "invalidation": "dependency_scoped" },
//!   "scheduler": { "max_concurrent_jobs": 1 }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the cache reacts to a graph update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationMode {
  /// Drop every entry.
  #[default]
  ClearAll,
  /// Drop entries of changed nodes and everything derived from them.
  DependencyScoped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub max_entries: usize,
  pub ttl_secs: u64,
  pub sweep_interval_secs: u64,
  pub invalidation: InvalidationMode,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: 500,
      ttl_secs: 300,
      sweep_interval_secs: 60,
      invalidation: InvalidationMode::default(),
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  pub max_concurrent_jobs: usize,
  pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      max_concurrent_jobs: 2,
      tick_interval_ms: 1000,
    }
  }
}

impl SchedulerConfig {
  pub fn tick_interval(&self) -> Duration {
    Duration::from_millis(self.tick_interval_ms.max(1))
  }
}

/// Top-level configuration for the engine and the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub cache: CacheConfig,
  pub scheduler: SchedulerConfig,
}
