use serde::Serialize;

/// Running counters of the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluatorStats {
  /// Processor invocations that succeeded.
  pub nodes_processed: u64,
  pub cache_hits: u64,
  pub cache_misses: u64,
  /// Processor invocations that failed.
  pub errors: u64,
  pub total_processing_ms: f64,
  pub average_processing_ms: f64,
}

impl EvaluatorStats {
  pub(crate) fn record_processed(&mut self, elapsed_ms: f64) {
    self.nodes_processed += 1;
    self.total_processing_ms += elapsed_ms;
    self.average_processing_ms +=
      (elapsed_ms - self.average_processing_ms) / self.nodes_processed as f64;
  }

  /// Share of cache lookups that hit, in `0.0..=1.0`.
  pub fn hit_rate(&self) -> f64 {
    let lookups = self.cache_hits + self.cache_misses;
    if lookups == 0 {
      0.0
    } else {
      self.cache_hits as f64 / lookups as f64
    }
  }
}

/// Engine-wide snapshot returned by `NodeEngine::stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
  pub node_count: usize,
  pub edge_count: usize,
  pub cache_size: usize,
  pub in_flight: usize,
  #[serde(flatten)]
  pub evaluator: EvaluatorStats,
}
