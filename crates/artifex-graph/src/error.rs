use thiserror::Error;

/// Structural problems found by [`Graph::validate`](crate::Graph::validate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: String, to: String },

  #[error("cycle detected: {}", path.join(" -> "))]
  Cycle { path: Vec<String> },
}
