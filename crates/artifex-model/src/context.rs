//! Processing context handed to every node evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Render quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
  Draft,
  #[default]
  Preview,
  Final,
}

impl fmt::Display for Quality {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Quality::Draft => "draft",
      Quality::Preview => "preview",
      Quality::Final => "final",
    };
    f.write_str(name)
  }
}

impl std::str::FromStr for Quality {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "draft" => Ok(Quality::Draft),
      "preview" => Ok(Quality::Preview),
      "final" => Ok(Quality::Final),
      other => Err(format!("unknown quality tier '{}'", other)),
    }
  }
}

/// Rectangle restricting processing to part of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

/// Execution hints. Forwarded to processors, never acted on by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingHints {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub threads: Option<usize>,
  #[serde(default)]
  pub gpu_acceleration: bool,
}

/// Parameters of one evaluation call.
///
/// `time`, `frame_index` and `quality` make up the cache signature; the
/// region of interest and hints do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingContext {
  /// Time in seconds.
  pub time: f64,
  pub frame_index: u64,
  #[serde(default)]
  pub quality: Quality,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub region_of_interest: Option<RegionOfInterest>,
  #[serde(default)]
  pub hints: ProcessingHints,
}

impl ProcessingContext {
  /// Context at `time` seconds, frame 0, preview quality.
  pub fn at(time: f64) -> Self {
    Self {
      time,
      frame_index: 0,
      quality: Quality::default(),
      region_of_interest: None,
      hints: ProcessingHints::default(),
    }
  }

  /// Context for `frame_index` of a sequence running at `fps`.
  pub fn for_frame(frame_index: u64, fps: f64) -> Self {
    let time = if fps > 0.0 {
      frame_index as f64 / fps
    } else {
      0.0
    };
    Self {
      frame_index,
      ..Self::at(time)
    }
  }

  pub fn with_quality(mut self, quality: Quality) -> Self {
    self.quality = quality;
    self
  }

  pub fn with_region(mut self, region: RegionOfInterest) -> Self {
    self.region_of_interest = Some(region);
    self
  }

  pub fn with_hints(mut self, hints: ProcessingHints) -> Self {
    self.hints = hints;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_for_frame_computes_time() {
    let ctx = ProcessingContext::for_frame(48, 24.0);
    assert_eq!(ctx.frame_index, 48);
    assert_eq!(ctx.time, 2.0);
  }

  #[test]
  fn test_for_frame_zero_fps() {
    let ctx = ProcessingContext::for_frame(10, 0.0);
    assert_eq!(ctx.time, 0.0);
  }

  #[test]
  fn test_quality_parse() {
    assert_eq!("final".parse::<Quality>(), Ok(Quality::Final));
    assert!("ultra".parse::<Quality>().is_err());
    assert_eq!(Quality::Draft.to_string(), "draft");
  }
}
