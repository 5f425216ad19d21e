//! Render job types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{ProcessingHints, Quality};

/// Status of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Queued,
  Processing,
  Completed,
  Failed,
  Cancelled,
}

impl JobStatus {
  /// Completed, failed and cancelled jobs never change again.
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
    )
  }
}

/// What a job produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
  #[default]
  Video,
  Image,
  Sequence,
  Audio,
}

/// Where a job's frames come from. Every variant names the node to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSource {
  Timeline { node_id: String },
  Node { node_id: String },
  Composition { composition_id: String, node_id: String },
}

impl JobSource {
  /// Id of the node evaluated for every frame.
  pub fn node_id(&self) -> &str {
    match self {
      JobSource::Timeline { node_id }
      | JobSource::Node { node_id }
      | JobSource::Composition { node_id, .. } => node_id,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
  pub width: u32,
  pub height: u32,
}

impl Default for Resolution {
  fn default() -> Self {
    Self {
      width: 1920,
      height: 1080,
    }
  }
}

/// Inclusive frame range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
  pub start: u64,
  pub end: u64,
}

impl FrameRange {
  pub fn new(start: u64, end: u64) -> Self {
    Self { start, end }
  }

  /// Number of frames in the range; zero when `end < start`. Saturates at
  /// `u64::MAX` for the full `0..=u64::MAX` range.
  pub fn len(&self) -> u64 {
    if self.end < self.start {
      0
    } else {
      (self.end - self.start).saturating_add(1)
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Output settings of a render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
  /// Encoder format, e.g. `jsonl` or `null`.
  pub format: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub codec: Option<String>,
  #[serde(default)]
  pub quality: Quality,
  #[serde(default)]
  pub resolution: Resolution,
  pub fps: f64,
  pub frame_range: FrameRange,
  #[serde(default = "default_color_space")]
  pub color_space: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub threads: Option<usize>,
  #[serde(default)]
  pub gpu_acceleration: bool,
}

fn default_color_space() -> String {
  "srgb".to_string()
}

impl RenderSettings {
  pub fn new(format: impl Into<String>, fps: f64, frame_range: FrameRange) -> Self {
    Self {
      format: format.into(),
      codec: None,
      quality: Quality::default(),
      resolution: Resolution::default(),
      fps,
      frame_range,
      color_space: default_color_space(),
      threads: None,
      gpu_acceleration: false,
    }
  }

  pub fn with_quality(mut self, quality: Quality) -> Self {
    self.quality = quality;
    self
  }

  /// Threading and GPU settings as context hints.
  pub fn hints(&self) -> ProcessingHints {
    ProcessingHints {
      threads: self.threads,
      gpu_acceleration: self.gpu_acceleration,
    }
  }
}

/// Everything needed to queue a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
  pub name: String,
  #[serde(default)]
  pub kind: JobKind,
  pub source: JobSource,
  pub output: PathBuf,
  pub settings: RenderSettings,
}

/// A render job and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
  pub id: String,
  pub name: String,
  pub kind: JobKind,
  pub source: JobSource,
  pub output: PathBuf,
  pub settings: RenderSettings,
  pub status: JobStatus,
  /// Percentage in `0.0..=100.0`.
  pub progress: f64,
  /// Lower values are more urgent.
  pub priority: u32,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub error: Option<String>,
}

impl RenderJob {
  /// Build a queued job from a request.
  pub fn queued(
    id: impl Into<String>,
    request: JobRequest,
    priority: u32,
    created_at: DateTime<Utc>,
  ) -> Self {
    Self {
      id: id.into(),
      name: request.name,
      kind: request.kind,
      source: request.source,
      output: request.output,
      settings: request.settings,
      status: JobStatus::Queued,
      progress: 0.0,
      priority,
      created_at,
      started_at: None,
      completed_at: None,
      error: None,
    }
  }

  /// Frames this job renders. Image jobs only render the first frame.
  pub fn frames(&self) -> FrameRange {
    let range = self.settings.frame_range;
    match self.kind {
      JobKind::Image => FrameRange::new(range.start, range.start),
      _ => range,
    }
  }

  /// Wall time between start and completion, in milliseconds.
  pub fn render_time_ms(&self) -> Option<f64> {
    match (self.started_at, self.completed_at) {
      (Some(start), Some(end)) => Some((end - start).num_microseconds()? as f64 / 1000.0),
      _ => None,
    }
  }
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderQueueStats {
  pub total_jobs: usize,
  pub queued_jobs: usize,
  pub processing_jobs: usize,
  pub completed_jobs: usize,
  pub failed_jobs: usize,
  pub cancelled_jobs: usize,
  pub average_render_time_ms: f64,
  pub estimated_time_remaining_ms: f64,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(kind: JobKind) -> JobRequest {
    JobRequest {
      name: "test".to_string(),
      kind,
      source: JobSource::Node {
        node_id: "out".to_string(),
      },
      output: PathBuf::from("/tmp/out.jsonl"),
      settings: RenderSettings::new("null", 24.0, FrameRange::new(10, 19)),
    }
  }

  #[test]
  fn test_frame_range_len() {
    assert_eq!(FrameRange::new(0, 0).len(), 1);
    assert_eq!(FrameRange::new(10, 19).len(), 10);
    assert!(FrameRange::new(5, 4).is_empty());
  }

  #[test]
  fn test_frame_range_len_saturates_on_full_range() {
    assert_eq!(FrameRange::new(0, u64::MAX).len(), u64::MAX);
    assert!(!FrameRange::new(0, u64::MAX).is_empty());
    assert_eq!(FrameRange::new(1, u64::MAX).len(), u64::MAX);
  }

  #[test]
  fn test_image_job_renders_single_frame() {
    let job = RenderJob::queued("j1", request(JobKind::Image), 0, Utc::now());
    assert_eq!(job.frames(), FrameRange::new(10, 10));

    let job = RenderJob::queued("j2", request(JobKind::Video), 0, Utc::now());
    assert_eq!(job.frames().len(), 10);
  }

  #[test]
  fn test_render_time() {
    let now = Utc::now();
    let mut job = RenderJob::queued("j1", request(JobKind::Video), 0, now);
    assert_eq!(job.render_time_ms(), None);

    job.started_at = Some(now);
    job.completed_at = Some(now + chrono::Duration::milliseconds(1500));
    assert_eq!(job.render_time_ms(), Some(1500.0));
  }

  #[test]
  fn test_terminal_status() {
    assert!(!JobStatus::Queued.is_terminal());
    assert!(!JobStatus::Processing.is_terminal());
    assert!(JobStatus::Cancelled.is_terminal());
  }

  #[test]
  fn test_source_node_id() {
    let source = JobSource::Composition {
      composition_id: "main".to_string(),
      node_id: "e".to_string(),
    };
    assert_eq!(source.node_id(), "e");
  }
}
