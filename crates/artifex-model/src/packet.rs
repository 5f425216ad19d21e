//! Data packets exchanged between nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordered metadata map attached to a packet.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// What a packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
  Video,
  Audio,
  Image,
  Geometry,
  Effect,
  Data,
}

/// The unit of data flowing along an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
  pub id: String,
  pub kind: PacketKind,
  pub format: String,
  #[serde(default)]
  pub metadata: Metadata,
  #[serde(default)]
  pub payload: serde_json::Value,
  /// Ids of the upstream packets this one was produced from.
  #[serde(default)]
  pub dependencies: Vec<String>,
  #[serde(default = "default_cacheable")]
  pub cacheable: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<i32>,
}

fn default_cacheable() -> bool {
  true
}

impl DataPacket {
  /// New cacheable packet with a fresh id and no payload.
  pub fn new(kind: PacketKind, format: impl Into<String>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      kind,
      format: format.into(),
      metadata: Metadata::new(),
      payload: serde_json::Value::Null,
      dependencies: Vec::new(),
      cacheable: true,
      priority: None,
    }
  }

  pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
    self.metadata.insert(key.into(), value.into());
    self
  }

  pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
    self.payload = payload;
    self
  }

  pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
    self.dependencies = dependencies;
    self
  }

  pub fn with_cacheable(mut self, cacheable: bool) -> Self {
    self.cacheable = cacheable;
    self
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = Some(priority);
    self
  }

  /// Copy of this packet under a new id, recording `self` as its dependency.
  pub fn derive(&self) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      dependencies: vec![self.id.clone()],
      ..self.clone()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_new_packet_defaults() {
    let packet = DataPacket::new(PacketKind::Video, "rgba8");
    assert!(packet.cacheable);
    assert!(packet.dependencies.is_empty());
    assert_eq!(packet.payload, serde_json::Value::Null);
  }

  #[test]
  fn test_derive_tracks_parent() {
    let parent = DataPacket::new(PacketKind::Image, "png").with_metadata("width", 1920);
    let child = parent.derive();

    assert_ne!(child.id, parent.id);
    assert_eq!(child.dependencies, vec![parent.id.clone()]);
    assert_eq!(child.metadata.get("width"), Some(&json!(1920)));
  }

  #[test]
  fn test_kind_serializes_snake_case() {
    assert_eq!(serde_json::to_value(PacketKind::Geometry).unwrap(), json!("geometry"));
  }
}
