//! Evaluation error types.

/// Failure reported by a node processor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
  /// A required input handle had no packets.
  #[error("missing input '{handle}'")]
  MissingInput { handle: String },

  /// A parameter was present but unusable.
  #[error("invalid parameter '{name}': {message}")]
  InvalidParam { name: String, message: String },

  /// Any other processing failure.
  #[error("{message}")]
  Failed { message: String },
}

impl ProcessError {
  pub fn missing_input(handle: impl Into<String>) -> Self {
    Self::MissingInput {
      handle: handle.into(),
    }
  }

  pub fn invalid_param(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidParam {
      name: name.into(),
      message: message.into(),
    }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }
}

/// Errors that abort an evaluation call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
  /// The requested node, or an edge source, is not in the graph.
  #[error("node '{node_id}' not found")]
  NodeNotFound { node_id: String },

  /// The node was reached again while already on the current call chain.
  #[error("circular dependency at node '{node_id}': {}", path.join(" -> "))]
  CircularDependency { node_id: String, path: Vec<String> },

  /// No processor is registered for the node's type tag.
  #[error("unknown node type '{node_type}' for node '{node_id}'")]
  UnknownNodeType { node_id: String, node_type: String },

  /// The node's processor failed.
  #[error("processing failed for node '{node_id}': {source}")]
  Processing {
    node_id: String,
    #[source]
    source: ProcessError,
  },
}

impl EvalError {
  /// Id of the node the error is about.
  pub fn node_id(&self) -> &str {
    match self {
      EvalError::NodeNotFound { node_id }
      | EvalError::CircularDependency { node_id, .. }
      | EvalError::UnknownNodeType { node_id, .. }
      | EvalError::Processing { node_id, .. } => node_id,
    }
  }
}
