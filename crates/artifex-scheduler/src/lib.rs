//! Artifex render scheduler
//!
//! Queues render jobs by priority and renders each one frame by frame through
//! the [`NodeEngine`](artifex_engine::NodeEngine), feeding the first packet of
//! every frame to an encoder chosen by output format.

mod encoder;
mod error;
mod scheduler;
mod stats;

pub use encoder::{
  EncodeSummary, EncoderFactory, EncoderRegistry, FrameEncoder, JsonlEncoder, JsonlEncoderFactory,
  NullEncoder, NullEncoderFactory,
};
pub use error::{EncodingError, SchedulerError};
pub use scheduler::RenderScheduler;
pub use stats::RunningAverage;
