//! Frame encoders.
//!
//! A job looks up an [`EncoderFactory`] by its output format, creates one
//! [`FrameEncoder`] and feeds it the first packet of every frame in order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use artifex_model::{DataPacket, Metadata, PacketKind, RenderJob};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::EncodingError;

/// What an encoder produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeSummary {
  pub frames: u64,
  pub bytes: u64,
}

/// Consumes the frames of one job.
#[async_trait]
pub trait FrameEncoder: Send {
  fn encode(&mut self, frame: u64, packet: &DataPacket) -> Result<(), EncodingError>;

  /// Flush whatever was buffered. Called once, after the last frame.
  async fn finish(self: Box<Self>) -> Result<EncodeSummary, EncodingError>;
}

/// Creates encoders for one output format.
pub trait EncoderFactory: Send + Sync {
  fn create(&self, job: &RenderJob) -> Result<Box<dyn FrameEncoder>, EncodingError>;
}

/// Output formats known to the scheduler.
#[derive(Clone, Default)]
pub struct EncoderRegistry {
  factories: HashMap<String, Arc<dyn EncoderFactory>>,
}

impl EncoderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with the `null` and `jsonl` formats.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry
      .register("null", NullEncoderFactory)
      .register("jsonl", JsonlEncoderFactory);
    registry
  }

  pub fn register(
    &mut self,
    format: impl Into<String>,
    factory: impl EncoderFactory + 'static,
  ) -> &mut Self {
    self.factories.insert(format.into(), Arc::new(factory));
    self
  }

  /// Encoder for the job's `settings.format`.
  pub fn create(&self, job: &RenderJob) -> Result<Box<dyn FrameEncoder>, EncodingError> {
    let format = &job.settings.format;
    let factory = self
      .factories
      .get(format)
      .ok_or_else(|| EncodingError::UnknownFormat(format.clone()))?;
    factory.create(job)
  }

  pub fn formats(&self) -> Vec<String> {
    let mut formats: Vec<String> = self.factories.keys().cloned().collect();
    formats.sort();
    formats
  }
}

impl std::fmt::Debug for EncoderRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EncoderRegistry")
      .field("formats", &self.formats())
      .finish()
  }
}

/// Discards frames, counting them.
#[derive(Debug, Default)]
pub struct NullEncoder {
  frames: u64,
}

#[async_trait]
impl FrameEncoder for NullEncoder {
  fn encode(&mut self, _frame: u64, _packet: &DataPacket) -> Result<(), EncodingError> {
    self.frames += 1;
    Ok(())
  }

  async fn finish(self: Box<Self>) -> Result<EncodeSummary, EncodingError> {
    Ok(EncodeSummary {
      frames: self.frames,
      bytes: 0,
    })
  }
}

pub struct NullEncoderFactory;

impl EncoderFactory for NullEncoderFactory {
  fn create(&self, _job: &RenderJob) -> Result<Box<dyn FrameEncoder>, EncodingError> {
    Ok(Box::new(NullEncoder::default()))
  }
}

/// One line of a `jsonl` render.
#[derive(Debug, Serialize)]
struct FrameRecord<'a> {
  frame: u64,
  packet_id: &'a str,
  kind: PacketKind,
  format: &'a str,
  metadata: &'a Metadata,
}

/// Writes one JSON line per frame to the job's output path.
///
/// Lines are buffered and written in one go by `finish`, so a failed or
/// cancelled job leaves no partial file behind.
#[derive(Debug)]
pub struct JsonlEncoder {
  path: PathBuf,
  buffer: String,
  frames: u64,
}

impl JsonlEncoder {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      buffer: String::new(),
      frames: 0,
    }
  }
}

#[async_trait]
impl FrameEncoder for JsonlEncoder {
  fn encode(&mut self, frame: u64, packet: &DataPacket) -> Result<(), EncodingError> {
    let record = FrameRecord {
      frame,
      packet_id: &packet.id,
      kind: packet.kind,
      format: &packet.format,
      metadata: &packet.metadata,
    };
    self.buffer.push_str(&serde_json::to_string(&record)?);
    self.buffer.push('\n');
    self.frames += 1;
    Ok(())
  }

  async fn finish(self: Box<Self>) -> Result<EncodeSummary, EncodingError> {
    let io_error = |source| EncodingError::Io {
      path: self.path.clone(),
      source,
    };
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    tokio::fs::write(&self.path, self.buffer.as_bytes())
      .await
      .map_err(io_error)?;

    debug!(path = %self.path.display(), frames = self.frames, "jsonl_written");
    Ok(EncodeSummary {
      frames: self.frames,
      bytes: self.buffer.len() as u64,
    })
  }
}

pub struct JsonlEncoderFactory;

impl EncoderFactory for JsonlEncoderFactory {
  fn create(&self, job: &RenderJob) -> Result<Box<dyn FrameEncoder>, EncodingError> {
    Ok(Box::new(JsonlEncoder::new(job.output.clone())))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_jsonl_writes_one_line_per_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("renders").join("out.jsonl");

    let mut encoder = Box::new(JsonlEncoder::new(&path));
    for frame in 3..6 {
      let packet = DataPacket::new(PacketKind::Video, "rgba8").with_metadata("timestamp", frame);
      encoder.encode(frame, &packet).unwrap();
    }
    let summary = encoder.finish().await.unwrap();
    assert_eq!(summary.frames, 3);

    let written = std::fs::read_to_string(&path).unwrap();
    let frames: Vec<u64> = written
      .lines()
      .map(|line| {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        value["frame"].as_u64().unwrap()
      })
      .collect();
    assert_eq!(frames, vec![3, 4, 5]);
    assert_eq!(summary.bytes, written.len() as u64);
  }

  #[tokio::test]
  async fn test_null_counts_frames() {
    let mut encoder = Box::new(NullEncoder::default());
    let packet = DataPacket::new(PacketKind::Data, "json");
    encoder.encode(0, &packet).unwrap();
    encoder.encode(1, &packet).unwrap();
    assert_eq!(encoder.finish().await.unwrap().frames, 2);
  }

  #[test]
  fn test_builtin_formats() {
    assert_eq!(EncoderRegistry::with_builtins().formats(), vec!["jsonl", "null"]);
  }
}
