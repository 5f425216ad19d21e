use serde::{Deserialize, Serialize};

use crate::node::{Edge, Node};

/// A graph definition as saved by the editor.
///
/// This is the on-disk shape; the engine turns it into an indexed graph on
/// `update_graph`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
  #[serde(default)]
  pub nodes: Vec<Node>,
  #[serde(default)]
  pub edges: Vec<Edge>,
}

impl GraphDef {
  pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
    Self { nodes, edges }
  }

  /// Split into the `(nodes, edges)` pair `update_graph` takes.
  pub fn into_parts(self) -> (Vec<Node>, Vec<Edge>) {
    (self.nodes, self.edges)
  }
}
