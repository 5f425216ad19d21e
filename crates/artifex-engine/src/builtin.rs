//! Built-in node processors.
//!
//! These describe the work a node would do rather than doing it: no media is
//! decoded and no generation provider is called. Every packet carries the
//! evaluation time as `timestamp` metadata.

use artifex_model::{DataPacket, Node, PacketKind, ProcessingContext};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::ProcessError;
use crate::processor::{NodeInputs, NodeProcessor, ProcessorRegistry};

pub(crate) fn register_builtins(registry: &mut ProcessorRegistry) {
  registry
    .register("input", InputProcessor)
    .register("ai_generator", AiGeneratorProcessor)
    .register("composite", CompositeProcessor)
    .register("color_correct", ColorCorrectProcessor)
    .register("output", OutputProcessor);
}

fn str_param<'a>(node: &'a Node, name: &str, default: &'a str) -> Result<&'a str, ProcessError> {
  match node.param(name) {
    None | Some(Value::Null) => Ok(default),
    Some(Value::String(s)) => Ok(s.as_str()),
    Some(_) => Err(ProcessError::invalid_param(name, "expected a string")),
  }
}

fn f64_param(node: &Node, name: &str, default: f64) -> Result<f64, ProcessError> {
  match node.param(name) {
    None | Some(Value::Null) => Ok(default),
    Some(value) => value
      .as_f64()
      .ok_or_else(|| ProcessError::invalid_param(name, "expected a number")),
  }
}

/// First packet on `handle`.
fn primary_input<'a>(inputs: &'a NodeInputs, handle: &str) -> Result<&'a DataPacket, ProcessError> {
  inputs
    .get(handle)
    .and_then(|packets| packets.first())
    .ok_or_else(|| ProcessError::missing_input(handle))
}

fn stamp(packet: DataPacket, ctx: &ProcessingContext) -> DataPacket {
  packet
    .with_metadata("timestamp", ctx.time)
    .with_metadata("frame", ctx.frame_index)
    .with_metadata("quality", ctx.quality.to_string())
}

/// Media source. Params: `path`, `media` (`video`, `image` or `audio`).
pub struct InputProcessor;

#[async_trait]
impl NodeProcessor for InputProcessor {
  async fn process(
    &self,
    node: &Node,
    _inputs: &NodeInputs,
    ctx: &ProcessingContext,
  ) -> Result<Vec<DataPacket>, ProcessError> {
    let path = str_param(node, "path", "")?;
    let (kind, format) = match str_param(node, "media", "video")? {
      "video" => (PacketKind::Video, "rgba8"),
      "image" => (PacketKind::Image, "rgba8"),
      "audio" => (PacketKind::Audio, "pcm_f32"),
      other => {
        return Err(ProcessError::invalid_param(
          "media",
          format!("unsupported media '{}'", other),
        ));
      }
    };

    let packet = DataPacket::new(kind, format)
      .with_metadata("source", path)
      .with_payload(json!({ "source": path, "time": ctx.time }));
    Ok(vec![stamp(packet, ctx)])
  }
}

/// Default provider for a generation task.
pub fn provider_for_task(task: &str) -> Option<&'static str> {
  match task {
    "video" => Some("runway"),
    "image" => Some("midjourney"),
    "music" => Some("suno"),
    "voice" => Some("elevenlabs"),
    "script" => Some("claude"),
    _ => None,
  }
}

/// AI generation request. Params: `task` (default `image`), `prompt`,
/// optional `provider` overriding the per-task default.
pub struct AiGeneratorProcessor;

#[async_trait]
impl NodeProcessor for AiGeneratorProcessor {
  async fn process(
    &self,
    node: &Node,
    _inputs: &NodeInputs,
    ctx: &ProcessingContext,
  ) -> Result<Vec<DataPacket>, ProcessError> {
    let task = str_param(node, "task", "image")?;
    let prompt = str_param(node, "prompt", "")?;
    let (kind, format) = match task {
      "video" => (PacketKind::Video, "rgba8"),
      "image" => (PacketKind::Image, "rgba8"),
      "music" | "voice" => (PacketKind::Audio, "pcm_f32"),
      "script" => (PacketKind::Data, "text"),
      other => {
        return Err(ProcessError::invalid_param(
          "task",
          format!("unknown generation task '{}'", other),
        ));
      }
    };
    let provider = match node.param("provider") {
      None | Some(Value::Null) => provider_for_task(task).unwrap_or_default(),
      Some(_) => str_param(node, "provider", "")?,
    };

    let packet = DataPacket::new(kind, format)
      .with_metadata("provider", provider)
      .with_metadata("task", task)
      .with_metadata("prompt", prompt)
      .with_payload(json!({ "provider": provider, "task": task, "prompt": prompt }));
    Ok(vec![stamp(packet, ctx)])
  }
}

/// Layers every input into one video frame. Params: `blend_mode` (default
/// `normal`), `opacity` in `0..=1` (default 1).
pub struct CompositeProcessor;

#[async_trait]
impl NodeProcessor for CompositeProcessor {
  async fn process(
    &self,
    node: &Node,
    inputs: &NodeInputs,
    ctx: &ProcessingContext,
  ) -> Result<Vec<DataPacket>, ProcessError> {
    let blend_mode = str_param(node, "blend_mode", "normal")?;
    let opacity = f64_param(node, "opacity", 1.0)?;
    if !(0.0..=1.0).contains(&opacity) {
      return Err(ProcessError::invalid_param("opacity", "must be within 0..=1"));
    }

    // Handles iterate in name order, so `input1` is the bottom layer.
    let layers: Vec<(&String, &DataPacket)> = inputs
      .iter()
      .flat_map(|(handle, packets)| packets.iter().map(move |packet| (handle, packet)))
      .collect();
    if layers.is_empty() {
      return Err(ProcessError::missing_input("input1"));
    }

    let described: Vec<Value> = layers
      .iter()
      .map(|(handle, packet)| {
        json!({
          "handle": handle,
          "kind": packet.kind,
          "format": packet.format,
          "packet": packet.id,
        })
      })
      .collect();
    let packet = DataPacket::new(PacketKind::Video, "rgba8")
      .with_metadata("blend_mode", blend_mode)
      .with_metadata("opacity", opacity)
      .with_metadata("layer_count", layers.len())
      .with_dependencies(layers.iter().map(|(_, packet)| packet.id.clone()).collect())
      .with_payload(json!({ "layers": described }));
    Ok(vec![stamp(packet, ctx)])
  }
}

/// Grades the packet on `input`. Params: `brightness` (default 0),
/// `contrast` and `saturation` (default 1).
pub struct ColorCorrectProcessor;

#[async_trait]
impl NodeProcessor for ColorCorrectProcessor {
  async fn process(
    &self,
    node: &Node,
    inputs: &NodeInputs,
    ctx: &ProcessingContext,
  ) -> Result<Vec<DataPacket>, ProcessError> {
    let source = primary_input(inputs, "input")?;
    let brightness = f64_param(node, "brightness", 0.0)?;
    let contrast = f64_param(node, "contrast", 1.0)?;
    let saturation = f64_param(node, "saturation", 1.0)?;

    let packet = source
      .derive()
      .with_metadata("brightness", brightness)
      .with_metadata("contrast", contrast)
      .with_metadata("saturation", saturation)
      .with_metadata("color_corrected", true);
    Ok(vec![stamp(packet, ctx)])
  }
}

/// Final sink of a graph. Param: `format` recorded as `output_format`.
pub struct OutputProcessor;

#[async_trait]
impl NodeProcessor for OutputProcessor {
  async fn process(
    &self,
    node: &Node,
    inputs: &NodeInputs,
    ctx: &ProcessingContext,
  ) -> Result<Vec<DataPacket>, ProcessError> {
    let source = primary_input(inputs, "input")?;
    let format = str_param(node, "format", &source.format)?;
    let packet = source.derive().with_metadata("output_format", format);
    Ok(vec![stamp(packet, ctx)])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn inputs(handle: &str, packet: DataPacket) -> NodeInputs {
    NodeInputs::from([(handle.to_string(), vec![packet])])
  }

  #[tokio::test]
  async fn test_input_packet_kind_follows_media() {
    let node = Node::new("a", "input").with_params(json!({ "path": "clip.mov", "media": "audio" }));
    let out = InputProcessor
      .process(&node, &NodeInputs::new(), &ProcessingContext::at(2.0))
      .await
      .unwrap();

    assert_eq!(out[0].kind, PacketKind::Audio);
    assert_eq!(out[0].metadata["source"], "clip.mov");
    assert_eq!(out[0].metadata["timestamp"].as_f64(), Some(2.0));
  }

  #[tokio::test]
  async fn test_input_rejects_unknown_media() {
    let node = Node::new("a", "input").with_params(json!({ "media": "hologram" }));
    let err = InputProcessor
      .process(&node, &NodeInputs::new(), &ProcessingContext::at(0.0))
      .await
      .unwrap_err();
    assert!(matches!(err, ProcessError::InvalidParam { ref name, .. } if name == "media"));
  }

  #[test]
  fn test_provider_table() {
    assert_eq!(provider_for_task("video"), Some("runway"));
    assert_eq!(provider_for_task("image"), Some("midjourney"));
    assert_eq!(provider_for_task("music"), Some("suno"));
    assert_eq!(provider_for_task("voice"), Some("elevenlabs"));
    assert_eq!(provider_for_task("script"), Some("claude"));
    assert_eq!(provider_for_task("hologram"), None);
  }

  #[tokio::test]
  async fn test_ai_generator_provider_override() {
    let ctx = ProcessingContext::at(0.0);
    let node = Node::new("b", "ai_generator").with_params(json!({ "task": "video" }));
    let out = AiGeneratorProcessor
      .process(&node, &NodeInputs::new(), &ctx)
      .await
      .unwrap();
    assert_eq!(out[0].metadata["provider"], "runway");
    assert_eq!(out[0].kind, PacketKind::Video);

    let node = Node::new("b", "ai_generator")
      .with_params(json!({ "task": "video", "provider": "pika" }));
    let out = AiGeneratorProcessor
      .process(&node, &NodeInputs::new(), &ctx)
      .await
      .unwrap();
    assert_eq!(out[0].metadata["provider"], "pika");
  }

  #[tokio::test]
  async fn test_composite_orders_layers_by_handle() {
    let bottom = DataPacket::new(PacketKind::Video, "rgba8");
    let top = DataPacket::new(PacketKind::Image, "rgba8");
    let mut layers = inputs("input2", top.clone());
    layers.insert("input1".to_string(), vec![bottom.clone()]);

    let out = CompositeProcessor
      .process(&Node::new("c", "composite"), &layers, &ProcessingContext::at(0.0))
      .await
      .unwrap();

    assert_eq!(out[0].kind, PacketKind::Video);
    assert_eq!(out[0].metadata["layer_count"], 2);
    assert_eq!(out[0].dependencies, vec![bottom.id.clone(), top.id.clone()]);
    assert_eq!(out[0].payload["layers"][0]["handle"], "input1");
  }

  #[tokio::test]
  async fn test_composite_without_inputs_fails() {
    let err = CompositeProcessor
      .process(
        &Node::new("c", "composite"),
        &NodeInputs::new(),
        &ProcessingContext::at(0.0),
      )
      .await
      .unwrap_err();
    assert_eq!(err, ProcessError::missing_input("input1"));
  }

  #[tokio::test]
  async fn test_color_correct_derives_from_input() {
    let source = DataPacket::new(PacketKind::Video, "rgba8");
    let node = Node::new("d", "color_correct").with_params(json!({ "brightness": 0.2 }));
    let out = ColorCorrectProcessor
      .process(&node, &inputs("input", source.clone()), &ProcessingContext::at(1.0))
      .await
      .unwrap();

    assert_eq!(out[0].dependencies, vec![source.id]);
    assert_eq!(out[0].metadata["brightness"].as_f64(), Some(0.2));
    assert_eq!(out[0].metadata["color_corrected"], true);
  }

  #[tokio::test]
  async fn test_output_requires_input() {
    let err = OutputProcessor
      .process(
        &Node::new("e", "output"),
        &NodeInputs::new(),
        &ProcessingContext::at(0.0),
      )
      .await
      .unwrap_err();
    assert_eq!(err, ProcessError::missing_input("input"));
  }
}
