//! Engine events and notifiers for observability.
//!
//! Events are emitted by the evaluator, the cache and the render scheduler so
//! the UI layer can observe progress, cache behaviour and job lifecycle.
//! Delivery is fire-and-forget: emitting never blocks and never fails.

use std::sync::Arc;

use artifex_model::{RenderJob, RenderQueueStats};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted by the engine and the scheduler.
///
/// Serialized with an `event` tag in camelCase, e.g.
/// `{"event":"cacheHit","nodeId":"a","cacheKey":"a@0:0:preview"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
  /// The graph was replaced.
  GraphUpdated { node_count: usize, edge_count: usize },

  /// A cached result was reused.
  CacheHit { node_id: String, cache_key: String },

  /// An entry was evicted to make room.
  CacheEvicted { key: String },

  /// The TTL sweep removed expired entries.
  CacheCleanup { cleaned: usize },

  /// Entries were dropped because the graph changed (or on request).
  CacheInvalidated { cleared: usize },

  /// A node's processor ran.
  NodeProcessed {
    node_id: String,
    processing_time_ms: f64,
    output_count: usize,
  },

  /// A node's processor failed.
  ProcessingError { node_id: String, error: String },

  JobQueued { job: RenderJob },
  JobStarted { job: RenderJob },
  JobProgress { job: RenderJob },
  JobCompleted { job: RenderJob },
  JobFailed { job: RenderJob },
  JobCancelled { job: RenderJob },

  /// Queue statistics were recomputed.
  StatsUpdated { stats: RenderQueueStats },
}

impl EngineEvent {
  /// The event name as seen by the UI (`cacheHit`, `jobProgress`, ...).
  pub fn name(&self) -> &'static str {
    match self {
      EngineEvent::GraphUpdated { .. } => "graphUpdated",
      EngineEvent::CacheHit { .. } => "cacheHit",
      EngineEvent::CacheEvicted { .. } => "cacheEvicted",
      EngineEvent::CacheCleanup { .. } => "cacheCleanup",
      EngineEvent::CacheInvalidated { .. } => "cacheInvalidated",
      EngineEvent::NodeProcessed { .. } => "nodeProcessed",
      EngineEvent::ProcessingError { .. } => "processingError",
      EngineEvent::JobQueued { .. } => "jobQueued",
      EngineEvent::JobStarted { .. } => "jobStarted",
      EngineEvent::JobProgress { .. } => "jobProgress",
      EngineEvent::JobCompleted { .. } => "jobCompleted",
      EngineEvent::JobFailed { .. } => "jobFailed",
      EngineEvent::JobCancelled { .. } => "jobCancelled",
      EngineEvent::StatsUpdated { .. } => "statsUpdated",
    }
  }
}

/// Trait for receiving engine events.
///
/// The engine calls `notify` for each event - implementations decide what to
/// do with them (broadcast, log, ignore, etc.).
pub trait EventNotifier: Send + Sync {
  /// Called when an event occurs.
  fn notify(&self, event: EngineEvent);
}

/// Shared notifier handle passed to every component.
pub type SharedNotifier = Arc<dyn EventNotifier>;

impl<T: EventNotifier + ?Sized> EventNotifier for Arc<T> {
  fn notify(&self, event: EngineEvent) {
    (**self).notify(event)
  }
}

/// A no-op notifier that discards all events.
///
/// Useful for tests or when event observation is not needed.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {
  fn notify(&self, _event: EngineEvent) {}
}

/// A notifier that sends events to a single unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // NOTE: unbounded so a slow consumer never stalls a frame loop. Volume is
  // one event per node run or frame, which a UI drains comfortably.
  sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelNotifier {
  /// Create a new channel notifier.
  pub fn new(sender: mpsc::UnboundedSender<EngineEvent>) -> Self {
    Self { sender }
  }
}

impl EventNotifier for ChannelNotifier {
  fn notify(&self, event: EngineEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Fan-out event bus with listener registration.
///
/// Every call to [`EventBus::subscribe`] registers a new listener; each event
/// is delivered to all listeners still alive. Listeners whose receiver was
/// dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
  listeners: Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a listener and get its receiving end.
  pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
    let (sender, receiver) = mpsc::unbounded_channel();
    self.listeners.lock().push(sender);
    receiver
  }

  /// Number of registered listeners (including ones not yet pruned).
  pub fn listener_count(&self) -> usize {
    self.listeners.lock().len()
  }
}

impl EventNotifier for EventBus {
  fn notify(&self, event: EngineEvent) {
    let mut listeners = self.listeners.lock();
    listeners.retain(|listener| listener.send(event.clone()).is_ok());
  }
}

/// A notifier that writes every event to the `tracing` log at debug level.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl EventNotifier for TracingNotifier {
  fn notify(&self, event: EngineEvent) {
    match serde_json::to_string(&event) {
      Ok(json) => tracing::debug!(event = event.name(), payload = %json, "engine_event"),
      Err(e) => tracing::warn!(event = event.name(), error = %e, "failed to serialize event"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_event_serializes_with_ui_names() {
    let event = EngineEvent::CacheHit {
      node_id: "a".to_string(),
      cache_key: "a@0:0:preview".to_string(),
    };
    assert_eq!(
      serde_json::to_value(&event).unwrap(),
      json!({ "event": "cacheHit", "nodeId": "a", "cacheKey": "a@0:0:preview" })
    );
    assert_eq!(event.name(), "cacheHit");
  }

  #[test]
  fn test_node_processed_field_names() {
    let event = EngineEvent::NodeProcessed {
      node_id: "c".to_string(),
      processing_time_ms: 1.5,
      output_count: 1,
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["processingTimeMs"], json!(1.5));
    assert_eq!(value["outputCount"], json!(1));
  }

  #[tokio::test]
  async fn test_bus_fans_out_to_all_listeners() {
    let bus = EventBus::new();
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    bus.notify(EngineEvent::CacheCleanup { cleaned: 3 });

    assert_eq!(first.recv().await, Some(EngineEvent::CacheCleanup { cleaned: 3 }));
    assert_eq!(second.recv().await, Some(EngineEvent::CacheCleanup { cleaned: 3 }));
  }

  #[test]
  fn test_bus_prunes_dropped_listeners() {
    let bus = EventBus::new();
    let kept = bus.subscribe();
    drop(bus.subscribe());
    assert_eq!(bus.listener_count(), 2);

    bus.notify(EngineEvent::CacheInvalidated { cleared: 0 });
    assert_eq!(bus.listener_count(), 1);
    drop(kept);
  }

  #[test]
  fn test_channel_notifier_ignores_closed_receiver() {
    let (sender, receiver) = mpsc::unbounded_channel();
    let notifier = ChannelNotifier::new(sender);
    drop(receiver);
    notifier.notify(EngineEvent::CacheEvicted {
      key: "k".to_string(),
    });
  }

  #[test]
  fn test_shared_notifier_delegates() {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let shared: SharedNotifier = Arc::new(ChannelNotifier::new(sender));
    shared.notify(EngineEvent::GraphUpdated {
      node_count: 2,
      edge_count: 1,
    });
    assert_eq!(
      receiver.try_recv().ok().map(|e| e.name()),
      Some("graphUpdated")
    );
  }
}
