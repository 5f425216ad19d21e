//! The engine facade.
//!
//! [`NodeEngine`] owns the current graph, the result cache and the evaluator,
//! and is the single entry point for graph updates and evaluation.
//!
//! A graph update advances the cache generation and invalidates under the
//! graph write lock. Evaluations snapshot the graph and its generation under
//! the read lock, so a call either sees the new graph with an invalidated
//! cache or runs on the old graph and has its results refused by the cache.

use std::sync::Arc;

use artifex_events::{EngineEvent, NoopNotifier, SharedNotifier};
use artifex_graph::{Graph, GraphError};
use artifex_model::{CacheConfig, DataPacket, Edge, EngineConfig, Node, ProcessingContext};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheInfo, NodeCache};
use crate::clock::{SharedClock, SystemClock};
use crate::error::EvalError;
use crate::evaluator::Evaluator;
use crate::invalidation::{InvalidationPolicy, policy_for};
use crate::processor::ProcessorRegistry;
use crate::stats::{EngineStats, EvaluatorStats};

/// Builder for [`NodeEngine`]. Unset parts default to a no-op notifier, the
/// system clock and the policy named by the cache config.
pub struct NodeEngineBuilder {
  config: CacheConfig,
  registry: ProcessorRegistry,
  notifier: SharedNotifier,
  clock: SharedClock,
  policy: Option<Box<dyn InvalidationPolicy>>,
}

impl NodeEngineBuilder {
  pub fn config(mut self, config: &EngineConfig) -> Self {
    self.config = config.cache.clone();
    self
  }

  pub fn cache_config(mut self, config: CacheConfig) -> Self {
    self.config = config;
    self
  }

  pub fn notifier(mut self, notifier: SharedNotifier) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn clock(mut self, clock: SharedClock) -> Self {
    self.clock = clock;
    self
  }

  /// Override the invalidation policy chosen by the config.
  pub fn invalidation(mut self, policy: impl InvalidationPolicy + 'static) -> Self {
    self.policy = Some(Box::new(policy));
    self
  }

  pub fn build(self) -> NodeEngine {
    let cache = Arc::new(NodeCache::new(
      &self.config,
      self.clock.clone(),
      self.notifier.clone(),
    ));
    let policy = self
      .policy
      .unwrap_or_else(|| policy_for(self.config.invalidation));
    debug!(
      max_entries = self.config.max_entries,
      ttl_secs = self.config.ttl_secs,
      invalidation = policy.name(),
      "node_engine_created"
    );

    let generation = cache.generation();
    NodeEngine {
      graph: RwLock::new(GraphSnapshot {
        graph: Arc::new(Graph::default()),
        generation,
      }),
      evaluator: Evaluator::new(self.registry, cache.clone(), self.notifier.clone()),
      cache,
      policy,
      notifier: self.notifier,
      clock: self.clock,
      sweep_interval: self.config.sweep_interval(),
    }
  }
}

/// The current graph and the cache generation it belongs to.
struct GraphSnapshot {
  graph: Arc<Graph>,
  generation: u64,
}

/// Graph store, cache and evaluator behind one handle.
///
/// Cheap to share behind an `Arc`: every method takes `&self`.
pub struct NodeEngine {
  graph: RwLock<GraphSnapshot>,
  evaluator: Evaluator,
  cache: Arc<NodeCache>,
  policy: Box<dyn InvalidationPolicy>,
  notifier: SharedNotifier,
  clock: SharedClock,
  sweep_interval: std::time::Duration,
}

impl NodeEngine {
  /// Engine with the given processors, default config, system clock and no
  /// event delivery.
  pub fn new(registry: ProcessorRegistry) -> Self {
    Self::builder(registry).build()
  }

  pub fn builder(registry: ProcessorRegistry) -> NodeEngineBuilder {
    NodeEngineBuilder {
      config: CacheConfig::default(),
      registry,
      notifier: Arc::new(NoopNotifier),
      clock: Arc::new(SystemClock),
      policy: None,
    }
  }

  /// Replace the graph and invalidate the cache according to the policy.
  ///
  /// Evaluations still running on the previous graph finish normally but
  /// their results are not cached. The graph is not checked for cycles here;
  /// see [`NodeEngine::validate_graph`].
  ///
  /// The update events are emitted while the graph lock is held, so a
  /// notifier must not call back into the engine.
  pub fn update_graph(&self, nodes: Vec<Node>, edges: Vec<Edge>) {
    let next = Arc::new(Graph::new(nodes, edges));
    let node_count = next.node_count();
    let edge_count = next.edge_count();

    warn_on_fan_in(&next);

    let mut snapshot = self.graph.write();
    let generation = self.cache.advance_generation();
    info!(node_count, edge_count, generation, "graph_updated");
    self.notifier.notify(EngineEvent::GraphUpdated {
      node_count,
      edge_count,
    });

    let cleared = self.policy.invalidate(&self.cache, &snapshot.graph, &next);
    debug!(cleared, policy = self.policy.name(), "cache_invalidated_on_update");
    *snapshot = GraphSnapshot {
      graph: next,
      generation,
    };
  }

  /// The current graph.
  pub fn graph(&self) -> Arc<Graph> {
    self.graph.read().graph.clone()
  }

  /// Generation of the current graph. Advances on every update.
  pub fn generation(&self) -> u64 {
    self.graph.read().generation
  }

  /// Structural check of the current graph: dangling edges, duplicate ids and
  /// cycles.
  pub fn validate_graph(&self) -> Result<(), GraphError> {
    self.graph().validate()
  }

  /// Check that `node_id` exists and nothing upstream of it forms a cycle.
  /// Returns its upstream nodes in dependency-first order.
  pub fn validate_target(&self, node_id: &str) -> Result<Vec<String>, GraphError> {
    self.graph().upstream_order(node_id)
  }

  /// Evaluate a node against the current graph.
  pub async fn evaluate(
    &self,
    node_id: &str,
    ctx: &ProcessingContext,
    force_recompute: bool,
  ) -> Result<Vec<DataPacket>, EvalError> {
    let (graph, generation) = {
      let snapshot = self.graph.read();
      (snapshot.graph.clone(), snapshot.generation)
    };
    self
      .evaluator
      .evaluate(&graph, generation, node_id, ctx, force_recompute)
      .await
  }

  pub fn stats(&self) -> EngineStats {
    let graph = self.graph();
    EngineStats {
      node_count: graph.node_count(),
      edge_count: graph.edge_count(),
      cache_size: self.cache.len(),
      in_flight: self.evaluator.in_flight(),
      evaluator: self.evaluator_stats(),
    }
  }

  pub fn evaluator_stats(&self) -> EvaluatorStats {
    self.evaluator.stats()
  }

  /// In-flight markers held by running evaluations. Zero when idle.
  pub fn in_flight(&self) -> usize {
    self.evaluator.in_flight()
  }

  pub fn cache_info(&self) -> CacheInfo {
    self.cache.info()
  }

  /// Drop every cache entry. Returns how many were dropped.
  pub fn clear_cache(&self) -> usize {
    self.cache.invalidate_all()
  }

  pub fn set_max_cache_size(&self, max_entries: usize) {
    self.cache.set_max_entries(max_entries);
  }

  /// Run one TTL sweep now.
  pub fn sweep_cache(&self) -> usize {
    self.cache.sweep_expired()
  }

  pub fn cache(&self) -> &Arc<NodeCache> {
    &self.cache
  }

  pub fn registry(&self) -> &ProcessorRegistry {
    self.evaluator.registry()
  }

  pub fn notifier(&self) -> &SharedNotifier {
    &self.notifier
  }

  pub fn clock(&self) -> &SharedClock {
    &self.clock
  }

  /// Sweep expired cache entries on a fixed interval until cancelled.
  #[instrument(name = "cache_sweeper", skip_all)]
  pub async fn run_cache_sweeper(&self, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(self.sweep_interval);
    // The first tick completes immediately.
    interval.tick().await;

    info!(interval_ms = self.sweep_interval.as_millis() as u64, "cache_sweeper_started");
    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("cache_sweeper_stopped");
          break;
        }
        _ = interval.tick() => {
          let cleaned = self.cache.sweep_expired();
          if cleaned > 0 {
            debug!(cleaned, "cache_sweep");
          }
        }
      }
    }
  }
}

impl Default for NodeEngine {
  fn default() -> Self {
    Self::new(ProcessorRegistry::with_builtins())
  }
}

impl std::fmt::Debug for NodeEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let graph = self.graph();
    f.debug_struct("NodeEngine")
      .field("nodes", &graph.node_count())
      .field("edges", &graph.edge_count())
      .field("cache_size", &self.cache.len())
      .field("policy", &self.policy.name())
      .finish()
  }
}

/// Warn about duplicate target handles, which resolve last-wins at
/// evaluation time.
fn warn_on_fan_in(graph: &Graph) {
  for node in graph.nodes() {
    let edges = graph.incoming_edges(&node.id);
    for (i, edge) in edges.iter().enumerate() {
      if edges[..i]
        .iter()
        .any(|earlier| earlier.target_handle == edge.target_handle)
      {
        warn!(node_id = %node.id, handle = %edge.target_handle, "input handle has several incoming edges");
      }
    }
  }
}
