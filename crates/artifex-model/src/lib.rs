//! Artifex Model
//!
//! This crate contains the serializable data model shared by the artifex
//! engine, the render scheduler and whatever UI sits on top of them.
//!
//! Types here carry no behaviour beyond small helpers; they are what flows
//! over the event bus and what gets loaded from disk:
//! - Graph definitions (nodes, edges) as written by the editor
//! - The per-call [`ProcessingContext`]
//! - [`DataPacket`]s exchanged between nodes
//! - Render jobs, their settings and queue statistics
//! - [`EngineConfig`] with defaults for the cache and the scheduler

mod config;
mod context;
mod graph;
mod job;
mod node;
mod packet;

pub use config::{CacheConfig, EngineConfig, InvalidationMode, SchedulerConfig};
pub use context::{ProcessingContext, ProcessingHints, Quality, RegionOfInterest};
pub use graph::GraphDef;
pub use job::{
  FrameRange, JobKind, JobRequest, JobSource, JobStatus, RenderJob, RenderQueueStats,
  RenderSettings, Resolution,
};
pub use node::{Edge, Node};
pub use packet::{DataPacket, Metadata, PacketKind};
