//! Processor trait and the type-tag registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use artifex_model::{DataPacket, Node, ProcessingContext};
use async_trait::async_trait;

use crate::error::ProcessError;

/// Evaluated inputs of a node, keyed by target input handle.
pub type NodeInputs = BTreeMap<String, Vec<DataPacket>>;

/// Metadata key naming the output handle a packet leaves on.
pub const OUTPUT_HANDLE_KEY: &str = "handle";

/// Turns a node's inputs into output packets.
///
/// Implementations must return at least one packet on success; the engine
/// does not interpret packets beyond their `id`, `cacheable` flag and
/// [`OUTPUT_HANDLE_KEY`] metadata. A node with several outputs tags each
/// packet with its handle; an edge then only carries the packets tagged with
/// its `source_handle`. Untagged packets travel on every outgoing edge.
#[async_trait]
pub trait NodeProcessor: Send + Sync {
  async fn process(
    &self,
    node: &Node,
    inputs: &NodeInputs,
    ctx: &ProcessingContext,
  ) -> Result<Vec<DataPacket>, ProcessError>;
}

/// The packets of `outputs` that leave on `handle`, in order.
///
/// The handle tag is removed from the delivered copies so packets derived
/// from them downstream do not inherit it.
pub fn packets_for_handle(outputs: &[DataPacket], handle: &str) -> Vec<DataPacket> {
  outputs
    .iter()
    .filter(|packet| match packet.metadata.get(OUTPUT_HANDLE_KEY) {
      Some(tag) => tag.as_str() == Some(handle),
      None => true,
    })
    .map(|packet| {
      let mut packet = packet.clone();
      packet.metadata.remove(OUTPUT_HANDLE_KEY);
      packet
    })
    .collect()
}

/// Adapter so plain closures can be registered as processors.
pub struct FnProcessor<F>(pub F);

#[async_trait]
impl<F> NodeProcessor for FnProcessor<F>
where
  F: Fn(&Node, &NodeInputs, &ProcessingContext) -> Result<Vec<DataPacket>, ProcessError>
    + Send
    + Sync,
{
  async fn process(
    &self,
    node: &Node,
    inputs: &NodeInputs,
    ctx: &ProcessingContext,
  ) -> Result<Vec<DataPacket>, ProcessError> {
    (self.0)(node, inputs, ctx)
  }
}

/// Maps node type tags to processors.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
  processors: HashMap<String, Arc<dyn NodeProcessor>>,
}

impl ProcessorRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding the built-in processors
  /// (`input`, `ai_generator`, `composite`, `color_correct`, `output`).
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    crate::builtin::register_builtins(&mut registry);
    registry
  }

  /// Register a processor, replacing any previous one for the same tag.
  pub fn register(
    &mut self,
    node_type: impl Into<String>,
    processor: impl NodeProcessor + 'static,
  ) -> &mut Self {
    self.processors.insert(node_type.into(), Arc::new(processor));
    self
  }

  /// Register a synchronous closure.
  pub fn register_fn<F>(&mut self, node_type: impl Into<String>, f: F) -> &mut Self
  where
    F: Fn(&Node, &NodeInputs, &ProcessingContext) -> Result<Vec<DataPacket>, ProcessError>
      + Send
      + Sync
      + 'static,
  {
    self.register(node_type, FnProcessor(f))
  }

  pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeProcessor>> {
    self.processors.get(node_type).cloned()
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.processors.contains_key(node_type)
  }

  /// Registered type tags, sorted.
  pub fn types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.processors.keys().cloned().collect();
    types.sort();
    types
  }
}

impl std::fmt::Debug for ProcessorRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProcessorRegistry")
      .field("types", &self.types())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use artifex_model::PacketKind;

  use super::*;

  #[tokio::test]
  async fn test_register_fn_dispatches() {
    let mut registry = ProcessorRegistry::new();
    registry.register_fn("const", |node, _, _| {
      Ok(vec![
        DataPacket::new(PacketKind::Data, "json").with_metadata("node", node.id.clone()),
      ])
    });

    let processor = registry.get("const").unwrap();
    let out = processor
      .process(
        &Node::new("n1", "const"),
        &NodeInputs::new(),
        &ProcessingContext::at(0.0),
      )
      .await
      .unwrap();
    assert_eq!(out[0].metadata["node"], "n1");
    assert!(registry.get("missing").is_none());
  }

  #[test]
  fn test_packets_for_handle_selects_tagged_and_untagged() {
    let left = DataPacket::new(PacketKind::Data, "json").with_metadata(OUTPUT_HANDLE_KEY, "left");
    let right = DataPacket::new(PacketKind::Data, "json").with_metadata(OUTPUT_HANDLE_KEY, "right");
    let shared = DataPacket::new(PacketKind::Data, "json");
    let outputs = vec![left.clone(), right.clone(), shared.clone()];

    let on_left = packets_for_handle(&outputs, "left");
    assert_eq!(
      on_left.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
      vec![left.id.as_str(), shared.id.as_str()]
    );
    assert!(on_left.iter().all(|p| !p.metadata.contains_key(OUTPUT_HANDLE_KEY)));

    let on_right = packets_for_handle(&outputs, "right");
    assert_eq!(on_right[0].id, right.id);
    assert_eq!(on_right.len(), 2);

    assert_eq!(packets_for_handle(&outputs, "output"), vec![shared]);
  }

  #[test]
  fn test_builtin_types() {
    let registry = ProcessorRegistry::with_builtins();
    assert_eq!(
      registry.types(),
      vec!["ai_generator", "color_correct", "composite", "input", "output"]
    );
  }
}
