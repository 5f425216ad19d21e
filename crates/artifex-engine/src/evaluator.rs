//! Recursive, memoized node evaluation.
//!
//! Evaluating a node first evaluates every upstream source with the same
//! context, then hands the collected inputs to the node's processor. Results
//! are memoized in the [`NodeCache`]. A node met again on its own call chain
//! fails the whole call with [`EvalError::CircularDependency`].
//!
//! Each call carries the graph generation it was started on. Its results are
//! only written back while that generation is still current.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use artifex_events::{EngineEvent, SharedNotifier};
use artifex_graph::Graph;
use artifex_model::{DataPacket, Node, ProcessingContext};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::cache::NodeCache;
use crate::error::EvalError;
use crate::key::CacheKey;
use crate::processor::{NodeInputs, ProcessorRegistry, packets_for_handle};
use crate::stats::EvaluatorStats;

/// In-flight markers of one top-level call.
///
/// Every marker is mirrored in the evaluator's shared counter. Markers still
/// held when the chain is dropped (the call's future was dropped mid-way) are
/// released from the counter then.
struct CallChain<'a> {
  path: Vec<String>,
  counter: &'a AtomicUsize,
  /// Graph generation the call started on.
  generation: u64,
}

impl<'a> CallChain<'a> {
  fn new(counter: &'a AtomicUsize, generation: u64) -> Self {
    Self {
      path: Vec::new(),
      counter,
      generation,
    }
  }

  fn enter(&mut self, node_id: &str) -> Result<(), EvalError> {
    if let Some(start) = self.path.iter().position(|id| id == node_id) {
      let mut path = self.path[start..].to_vec();
      path.push(node_id.to_string());
      return Err(EvalError::CircularDependency {
        node_id: node_id.to_string(),
        path,
      });
    }
    self.path.push(node_id.to_string());
    self.counter.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn leave(&mut self, node_id: &str) {
    if let Some(pos) = self.path.iter().rposition(|id| id == node_id) {
      self.path.remove(pos);
      self.counter.fetch_sub(1, Ordering::SeqCst);
    }
  }
}

impl Drop for CallChain<'_> {
  fn drop(&mut self) {
    if !self.path.is_empty() {
      self.counter.fetch_sub(self.path.len(), Ordering::SeqCst);
    }
  }
}

pub struct Evaluator {
  registry: ProcessorRegistry,
  cache: Arc<NodeCache>,
  notifier: SharedNotifier,
  stats: Mutex<EvaluatorStats>,
  in_flight: AtomicUsize,
}

impl Evaluator {
  pub fn new(registry: ProcessorRegistry, cache: Arc<NodeCache>, notifier: SharedNotifier) -> Self {
    Self {
      registry,
      cache,
      notifier,
      stats: Mutex::new(EvaluatorStats::default()),
      in_flight: AtomicUsize::new(0),
    }
  }

  /// In-flight markers held across all running calls.
  pub fn in_flight(&self) -> usize {
    self.in_flight.load(Ordering::SeqCst)
  }

  pub fn stats(&self) -> EvaluatorStats {
    self.stats.lock().clone()
  }

  pub fn registry(&self) -> &ProcessorRegistry {
    &self.registry
  }

  /// Evaluate `node_id` in `graph`, which is graph `generation` of the
  /// cache (see [`NodeCache::generation`]).
  ///
  /// `force_recompute` skips the cache lookup for the requested node only;
  /// upstream nodes are still served from the cache.
  #[instrument(
    name = "evaluate",
    skip_all,
    fields(
      node_id = %node_id,
      generation = generation,
      time = ctx.time,
      frame = ctx.frame_index,
      quality = %ctx.quality
    )
  )]
  pub async fn evaluate(
    &self,
    graph: &Graph,
    generation: u64,
    node_id: &str,
    ctx: &ProcessingContext,
    force_recompute: bool,
  ) -> Result<Vec<DataPacket>, EvalError> {
    let mut chain = CallChain::new(&self.in_flight, generation);
    let result = self
      .evaluate_node(graph, node_id, ctx, force_recompute, &mut chain)
      .await;

    if let Err(e) = &result {
      warn!(node_id = %node_id, error = %e, "evaluation_failed");
    }
    result
  }

  fn evaluate_node<'a, 'c>(
    &'a self,
    graph: &'a Graph,
    node_id: &'a str,
    ctx: &'a ProcessingContext,
    force_recompute: bool,
    chain: &'a mut CallChain<'c>,
  ) -> BoxFuture<'a, Result<Vec<DataPacket>, EvalError>> {
    async move {
      let node = graph.node(node_id).ok_or_else(|| EvalError::NodeNotFound {
        node_id: node_id.to_string(),
      })?;
      let key = CacheKey::new(node_id, ctx);

      if !force_recompute {
        if let Some(packets) = self.cache.get(&key) {
          self.stats.lock().cache_hits += 1;
          debug!(node_id = %node_id, cache_key = %key, "cache_hit");
          self.notifier.notify(EngineEvent::CacheHit {
            node_id: node_id.to_string(),
            cache_key: key.to_string(),
          });
          return Ok(packets);
        }
        self.stats.lock().cache_misses += 1;
      }

      chain.enter(node_id)?;
      let result = self.process_node(graph, node, key, ctx, chain).await;
      chain.leave(node_id);
      result
    }
    .boxed()
  }

  async fn process_node(
    &self,
    graph: &Graph,
    node: &Node,
    key: CacheKey,
    ctx: &ProcessingContext,
    chain: &mut CallChain<'_>,
  ) -> Result<Vec<DataPacket>, EvalError> {
    let mut inputs = NodeInputs::new();
    for edge in graph.incoming_edges(&node.id) {
      let packets = self
        .evaluate_node(graph, &edge.source, ctx, false, chain)
        .await?;
      // Several edges into one handle: the last one wins.
      inputs.insert(
        edge.target_handle.clone(),
        packets_for_handle(&packets, &edge.source_handle),
      );
    }

    let processor =
      self
        .registry
        .get(&node.node_type)
        .ok_or_else(|| EvalError::UnknownNodeType {
          node_id: node.id.clone(),
          node_type: node.node_type.clone(),
        })?;

    let started = Instant::now();
    let outputs = match processor.process(node, &inputs, ctx).await {
      Ok(outputs) => outputs,
      Err(source) => {
        self.stats.lock().errors += 1;
        error!(node_id = %node.id, node_type = %node.node_type, error = %source, "processing_failed");
        self.notifier.notify(EngineEvent::ProcessingError {
          node_id: node.id.clone(),
          error: source.to_string(),
        });
        return Err(EvalError::Processing {
          node_id: node.id.clone(),
          source,
        });
      }
    };
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    self.stats.lock().record_processed(elapsed_ms);
    debug!(
      node_id = %node.id,
      node_type = %node.node_type,
      processing_time_ms = elapsed_ms,
      output_count = outputs.len(),
      "node_processed"
    );
    self.notifier.notify(EngineEvent::NodeProcessed {
      node_id: node.id.clone(),
      processing_time_ms: elapsed_ms,
      output_count: outputs.len(),
    });

    if outputs.iter().any(|packet| packet.cacheable) {
      let dependency_ids = inputs
        .values()
        .flatten()
        .map(|packet| packet.id.clone())
        .collect();
      self
        .cache
        .put_if_current(chain.generation, key, outputs.clone(), dependency_ids);
    }

    Ok(outputs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_call_chain_detects_revisit() {
    let counter = AtomicUsize::new(0);
    let mut chain = CallChain::new(&counter, 0);
    chain.enter("a").unwrap();
    chain.enter("b").unwrap();

    let err = chain.enter("a").unwrap_err();
    assert_eq!(
      err,
      EvalError::CircularDependency {
        node_id: "a".to_string(),
        path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
      }
    );
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    chain.leave("b");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_dropped_chain_releases_markers() {
    let counter = AtomicUsize::new(0);
    {
      let mut chain = CallChain::new(&counter, 0);
      chain.enter("a").unwrap();
      chain.enter("b").unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }
}
