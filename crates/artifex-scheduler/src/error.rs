//! Scheduler error types.

use std::path::PathBuf;

use artifex_engine::EvalError;
use artifex_graph::GraphError;

/// Errors raised while encoding frames.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
  #[error("unknown output format '{0}'")]
  UnknownFormat(String),

  #[error("failed to serialize frame: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("failed to write '{}': {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Errors that fail a render job. Recorded on the job as a message.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
  #[error("evaluation failed: {0}")]
  Evaluation(#[from] EvalError),

  #[error("invalid graph: {0}")]
  Graph(#[from] GraphError),

  #[error("encoding failed: {0}")]
  Encoding(#[from] EncodingError),

  /// The evaluated node returned no packets for a frame.
  #[error("node '{node_id}' produced no packets for frame {frame}")]
  EmptyFrame { node_id: String, frame: u64 },
}
