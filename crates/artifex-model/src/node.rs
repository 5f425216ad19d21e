use serde::{Deserialize, Serialize};

/// A node in the evaluation graph.
///
/// `node_type` selects the processor that runs the node; `params` is handed
/// to that processor untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub id: String,
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default = "empty_params")]
  pub params: serde_json::Value,
}

impl Node {
  pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      node_type: node_type.into(),
      params: empty_params(),
    }
  }

  /// Replace the parameter bag.
  pub fn with_params(mut self, params: serde_json::Value) -> Self {
    self.params = params;
    self
  }

  /// Look up a single parameter by name.
  pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
    self.params.get(name)
  }
}

fn empty_params() -> serde_json::Value {
  serde_json::Value::Object(serde_json::Map::new())
}

/// A connection from one node's output handle to another node's input handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
  pub source: String,
  #[serde(default = "default_output_handle")]
  pub source_handle: String,
  pub target: String,
  #[serde(default = "default_input_handle")]
  pub target_handle: String,
}

impl Edge {
  pub fn new(
    source: impl Into<String>,
    source_handle: impl Into<String>,
    target: impl Into<String>,
    target_handle: impl Into<String>,
  ) -> Self {
    Self {
      source: source.into(),
      source_handle: source_handle.into(),
      target: target.into(),
      target_handle: target_handle.into(),
    }
  }

  /// Edge between the default `output` and `input` handles.
  pub fn simple(source: impl Into<String>, target: impl Into<String>) -> Self {
    Self::new(source, "output", target, "input")
  }
}

fn default_output_handle() -> String {
  "output".to_string()
}

fn default_input_handle() -> String {
  "input".to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_node_deserialize_without_params() {
    let node: Node = serde_json::from_value(json!({ "id": "a", "type": "input" })).unwrap();
    assert_eq!(node.node_type, "input");
    assert_eq!(node.params, json!({}));
  }

  #[test]
  fn test_node_param_lookup() {
    let node = Node::new("cc", "color_correct").with_params(json!({ "brightness": 0.2 }));
    assert_eq!(node.param("brightness"), Some(&json!(0.2)));
    assert_eq!(node.param("contrast"), None);
  }

  #[test]
  fn test_edge_handles_roundtrip_names() {
    let edge: Edge = serde_json::from_value(json!({
      "source": "a",
      "source_handle": "output",
      "target": "c",
      "target_handle": "input1"
    }))
    .unwrap();
    assert_eq!(edge, Edge::new("a", "output", "c", "input1"));
  }
}
