//! What the cache drops when the graph is replaced.

use artifex_graph::Graph;
use artifex_model::InvalidationMode;

use crate::cache::NodeCache;

/// Decides which cache entries a graph update makes stale.
pub trait InvalidationPolicy: Send + Sync {
  /// Invalidate entries made stale by going from `previous` to `next`.
  /// Returns the number of entries removed.
  fn invalidate(&self, cache: &NodeCache, previous: &Graph, next: &Graph) -> usize;

  fn name(&self) -> &'static str;
}

/// Drop every entry on every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearAll;

impl InvalidationPolicy for ClearAll {
  fn invalidate(&self, cache: &NodeCache, _previous: &Graph, _next: &Graph) -> usize {
    cache.invalidate_all()
  }

  fn name(&self) -> &'static str {
    "clear_all"
  }
}

/// Drop entries of dirty nodes and everything derived from their packets.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyScoped;

impl InvalidationPolicy for DependencyScoped {
  fn invalidate(&self, cache: &NodeCache, previous: &Graph, next: &Graph) -> usize {
    let dirty = Graph::dirty_nodes(previous, next);
    cache.invalidate_nodes(&dirty)
  }

  fn name(&self) -> &'static str {
    "dependency_scoped"
  }
}

/// Policy for a configured mode.
pub fn policy_for(mode: InvalidationMode) -> Box<dyn InvalidationPolicy> {
  match mode {
    InvalidationMode::ClearAll => Box::new(ClearAll),
    InvalidationMode::DependencyScoped => Box::new(DependencyScoped),
  }
}
