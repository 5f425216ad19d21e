use std::fmt;

use artifex_model::{ProcessingContext, Quality};

/// Cache signature of one node evaluation: node id, time, frame index and
/// quality tier.
///
/// Time is stored by its bit pattern so the key can be hashed. `-0.0` is
/// folded into `0.0` so both address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  node_id: String,
  time_bits: u64,
  frame_index: u64,
  quality: Quality,
}

impl CacheKey {
  pub fn new(node_id: impl Into<String>, ctx: &ProcessingContext) -> Self {
    let time = if ctx.time == 0.0 { 0.0 } else { ctx.time };
    Self {
      node_id: node_id.into(),
      time_bits: time.to_bits(),
      frame_index: ctx.frame_index,
      quality: ctx.quality,
    }
  }

  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  pub fn time(&self) -> f64 {
    f64::from_bits(self.time_bits)
  }

  pub fn frame_index(&self) -> u64 {
    self.frame_index
  }

  pub fn quality(&self) -> Quality {
    self.quality
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}@{}:{}:{}",
      self.node_id,
      self.time(),
      self.frame_index,
      self.quality
    )
  }
}
