//! Render job scheduler.
//!
//! Jobs wait in a priority queue (lower value first, insertion order on ties)
//! and are started by [`RenderScheduler::tick`] while fewer than
//! `max_concurrent_jobs` are active. Each started job runs as its own tokio
//! task that renders frames strictly in order, yielding between frames.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use artifex_engine::{NodeEngine, SharedClock};
use artifex_events::{EngineEvent, SharedNotifier};
use artifex_model::{
  JobRequest, JobStatus, ProcessingContext, RenderJob, RenderQueueStats, SchedulerConfig,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::encoder::EncoderRegistry;
use crate::error::SchedulerError;
use crate::stats::RunningAverage;

/// How a job's frame loop ended.
enum RenderOutcome {
  Completed { frames: u64 },
  Cancelled,
}

struct SchedulerState {
  /// Every job ever added, until cleared.
  jobs: HashMap<String, RenderJob>,
  /// Job ids in insertion order.
  order: Vec<String>,
  /// Pending job ids, ordered by priority.
  queue: VecDeque<String>,
  /// Running jobs and their cancellation tokens.
  active: HashMap<String, CancellationToken>,
  max_concurrent_jobs: usize,
  render_times: RunningAverage,
}

impl SchedulerState {
  fn stats(&self) -> RenderQueueStats {
    let mut stats = RenderQueueStats {
      total_jobs: self.jobs.len(),
      average_render_time_ms: self.render_times.mean(),
      ..Default::default()
    };
    for job in self.jobs.values() {
      match job.status {
        JobStatus::Queued => stats.queued_jobs += 1,
        JobStatus::Processing => stats.processing_jobs += 1,
        JobStatus::Completed => stats.completed_jobs += 1,
        JobStatus::Failed => stats.failed_jobs += 1,
        JobStatus::Cancelled => stats.cancelled_jobs += 1,
      }
    }
    stats.estimated_time_remaining_ms = stats.queued_jobs as f64 * stats.average_render_time_ms;
    stats
  }
}

struct Inner {
  engine: Arc<NodeEngine>,
  encoders: EncoderRegistry,
  notifier: SharedNotifier,
  clock: SharedClock,
  tick_interval: std::time::Duration,
  state: Mutex<SchedulerState>,
  job_finished: Notify,
}

/// Priority queue of render jobs on top of a [`NodeEngine`].
///
/// Cloning is cheap and every clone drives the same queue.
///
/// # Usage
///
/// ```ignore
/// let scheduler = RenderScheduler::new(engine, &config.scheduler);
/// let job_id = scheduler.add_render_job(request, 0);
///
/// // Either tick on an interval...
/// let cancel = CancellationToken::new();
/// tokio::spawn({
///   let scheduler = scheduler.clone();
///   async move { scheduler.start(cancel).await }
/// });
///
/// // ...or drain the queue once.
/// scheduler.run_until_idle().await;
/// ```
#[derive(Clone)]
pub struct RenderScheduler {
  inner: Arc<Inner>,
}

impl RenderScheduler {
  /// Scheduler with the built-in encoders. Events go to the engine's notifier.
  pub fn new(engine: Arc<NodeEngine>, config: &SchedulerConfig) -> Self {
    Self::with_encoders(engine, config, EncoderRegistry::with_builtins())
  }

  pub fn with_encoders(
    engine: Arc<NodeEngine>,
    config: &SchedulerConfig,
    encoders: EncoderRegistry,
  ) -> Self {
    let notifier = engine.notifier().clone();
    let clock = engine.clock().clone();
    Self {
      inner: Arc::new(Inner {
        engine,
        encoders,
        notifier,
        clock,
        tick_interval: config.tick_interval(),
        state: Mutex::new(SchedulerState {
          jobs: HashMap::new(),
          order: Vec::new(),
          queue: VecDeque::new(),
          active: HashMap::new(),
          max_concurrent_jobs: config.max_concurrent_jobs,
          render_times: RunningAverage::default(),
        }),
        job_finished: Notify::new(),
      }),
    }
  }

  pub fn engine(&self) -> &Arc<NodeEngine> {
    &self.inner.engine
  }

  /// Queue a job. Lower `priority` values start first; equal priorities keep
  /// insertion order.
  pub fn add_render_job(&self, request: JobRequest, priority: u32) -> String {
    let job_id = uuid::Uuid::new_v4().to_string();
    let job = RenderJob::queued(job_id.clone(), request, priority, self.inner.clock.now());

    {
      let mut state = self.inner.state.lock();
      let position = state
        .queue
        .iter()
        .position(|id| state.jobs.get(id).is_some_and(|queued| queued.priority > priority))
        .unwrap_or(state.queue.len());
      state.queue.insert(position, job_id.clone());
      state.order.push(job_id.clone());
      state.jobs.insert(job_id.clone(), job.clone());
    }

    info!(job_id = %job_id, name = %job.name, priority, "job_queued");
    self.inner.notifier.notify(EngineEvent::JobQueued { job });
    job_id
  }

  /// Start queued jobs while capacity allows, then publish stats.
  /// Returns how many jobs were started.
  ///
  /// Must be called from within a tokio runtime.
  pub fn tick(&self) -> usize {
    let mut started = 0;
    loop {
      let next = {
        let mut state = self.inner.state.lock();
        if state.active.len() >= state.max_concurrent_jobs {
          None
        } else {
          state.queue.pop_front().and_then(|job_id| {
            let now = self.inner.clock.now();
            let job = state.jobs.get_mut(&job_id)?;
            job.status = JobStatus::Processing;
            job.started_at = Some(now);
            let job = job.clone();

            let cancel = CancellationToken::new();
            state.active.insert(job_id.clone(), cancel.clone());
            Some((job, cancel))
          })
        }
      };
      let Some((job, cancel)) = next else {
        break;
      };

      info!(job_id = %job.id, node_id = %job.source.node_id(), "job_started");
      let job_id = job.id.clone();
      self.inner.notifier.notify(EngineEvent::JobStarted { job });
      tokio::spawn(self.clone().run_job(job_id, cancel));
      started += 1;
    }

    self.publish_stats();
    started
  }

  /// Tick on the configured interval until cancelled.
  ///
  /// Running jobs are left to finish; cancel them individually to stop them.
  pub async fn start(&self, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(self.inner.tick_interval);
    info!(
      tick_interval_ms = self.inner.tick_interval.as_millis() as u64,
      "render_scheduler_started"
    );

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("render_scheduler_stopped");
          break;
        }
        _ = interval.tick() => {
          self.tick();
        }
      }
    }
  }

  /// Tick until nothing is queued or running.
  ///
  /// Returns early, leaving jobs queued, when nothing runs and nothing can
  /// start (a concurrency limit of zero).
  pub async fn run_until_idle(&self) {
    loop {
      let finished = self.inner.job_finished.notified();
      self.tick();
      {
        let state = self.inner.state.lock();
        if state.active.is_empty() {
          if state.queue.is_empty() {
            break;
          }
          if state.max_concurrent_jobs == 0 {
            warn!(queued = state.queue.len(), "queued jobs cannot start, max_concurrent_jobs is 0");
            break;
          }
          // Everything started by this tick already finished.
          continue;
        }
      }
      finished.await;
    }
  }

  pub fn is_idle(&self) -> bool {
    let state = self.inner.state.lock();
    state.queue.is_empty() && state.active.is_empty()
  }

  /// Cancel a queued or running job.
  ///
  /// A queued job is cancelled at once. A running job is flagged and stops
  /// before its next frame. Unknown and finished jobs return `false`.
  pub fn cancel_render_job(&self, job_id: &str) -> bool {
    let cancelled = {
      let mut state = self.inner.state.lock();
      if let Some(position) = state.queue.iter().position(|id| id == job_id) {
        state.queue.remove(position);
        let now = self.inner.clock.now();
        state.jobs.get_mut(job_id).map(|job| {
          job.status = JobStatus::Cancelled;
          job.completed_at = Some(now);
          Some(job.clone())
        })
      } else if let Some(cancel) = state.active.get(job_id).cloned() {
        match state.jobs.get_mut(job_id) {
          Some(job) if !job.status.is_terminal() => {
            cancel.cancel();
            job.status = JobStatus::Cancelled;
            // The frame loop reports the cancellation when it stops.
            Some(None)
          }
          _ => None,
        }
      } else {
        None
      }
    };

    match cancelled {
      Some(Some(job)) => {
        info!(job_id = %job_id, "job_cancelled");
        self.inner.notifier.notify(EngineEvent::JobCancelled { job });
        self.publish_stats();
        true
      }
      Some(None) => {
        debug!(job_id = %job_id, "job_cancel_requested");
        true
      }
      None => false,
    }
  }

  pub fn set_max_concurrent_jobs(&self, max_concurrent_jobs: usize) {
    self.inner.state.lock().max_concurrent_jobs = max_concurrent_jobs;
  }

  pub fn get_render_job(&self, job_id: &str) -> Option<RenderJob> {
    self.inner.state.lock().jobs.get(job_id).cloned()
  }

  /// Every known job, in insertion order.
  pub fn get_all_render_jobs(&self) -> Vec<RenderJob> {
    let state = self.inner.state.lock();
    state
      .order
      .iter()
      .filter_map(|id| state.jobs.get(id).cloned())
      .collect()
  }

  pub fn stats(&self) -> RenderQueueStats {
    self.inner.state.lock().stats()
  }

  /// Forget completed, failed and cancelled jobs that are no longer running.
  pub fn clear_finished_jobs(&self) -> usize {
    let mut state = self.inner.state.lock();
    let SchedulerState {
      jobs,
      order,
      active,
      ..
    } = &mut *state;

    let before = jobs.len();
    jobs.retain(|id, job| !job.status.is_terminal() || active.contains_key(id));
    order.retain(|id| jobs.contains_key(id));
    before - jobs.len()
  }

  fn publish_stats(&self) {
    let stats = self.stats();
    self.inner.notifier.notify(EngineEvent::StatsUpdated { stats });
  }

  #[instrument(name = "render_job", skip_all, fields(job_id = %job_id))]
  async fn run_job(self, job_id: String, cancel: CancellationToken) {
    let outcome = self.render_frames(&job_id, &cancel).await;
    self.finish_job(&job_id, &cancel, outcome);
    self.inner.job_finished.notify_waiters();
  }

  async fn render_frames(
    &self,
    job_id: &str,
    cancel: &CancellationToken,
  ) -> Result<RenderOutcome, SchedulerError> {
    let Some(job) = self.get_render_job(job_id) else {
      return Ok(RenderOutcome::Cancelled);
    };
    let node_id = job.source.node_id().to_string();
    let settings = &job.settings;

    // Reject cyclic or broken upstream graphs before spending any frames.
    self.inner.engine.validate_target(&node_id)?;
    let mut encoder = self.inner.encoders.create(&job)?;

    let frames = job.frames();
    let total = frames.len();
    for (done, frame) in (frames.start..=frames.end).enumerate() {
      if cancel.is_cancelled() {
        return Ok(RenderOutcome::Cancelled);
      }

      let ctx = ProcessingContext::for_frame(frame, settings.fps)
        .with_quality(settings.quality)
        .with_hints(settings.hints());
      let packets = self.inner.engine.evaluate(&node_id, &ctx, false).await?;
      let packet = packets.first().ok_or_else(|| SchedulerError::EmptyFrame {
        node_id: node_id.clone(),
        frame,
      })?;
      encoder.encode(frame, packet)?;

      let progress = (done as u64 + 1) as f64 / total as f64 * 100.0;
      if let Some(job) = self.update_progress(job_id, progress) {
        self.inner.notifier.notify(EngineEvent::JobProgress { job });
      }

      tokio::task::yield_now().await;
    }

    let summary = encoder.finish().await?;
    Ok(RenderOutcome::Completed {
      frames: summary.frames,
    })
  }

  fn update_progress(&self, job_id: &str, progress: f64) -> Option<RenderJob> {
    let mut state = self.inner.state.lock();
    let job = state.jobs.get_mut(job_id)?;
    job.progress = progress;
    Some(job.clone())
  }

  fn finish_job(
    &self,
    job_id: &str,
    cancel: &CancellationToken,
    outcome: Result<RenderOutcome, SchedulerError>,
  ) {
    let now = self.inner.clock.now();
    let finished = {
      let mut state = self.inner.state.lock();
      state.active.remove(job_id);
      let SchedulerState {
        jobs, render_times, ..
      } = &mut *state;
      let Some(job) = jobs.get_mut(job_id) else {
        return;
      };
      job.completed_at = Some(now);

      let outcome = if cancel.is_cancelled() {
        Ok(RenderOutcome::Cancelled)
      } else {
        outcome
      };
      match outcome {
        Ok(RenderOutcome::Completed { frames }) => {
          job.status = JobStatus::Completed;
          job.progress = 100.0;
          let render_time_ms = job.render_time_ms().unwrap_or_default();
          render_times.record(render_time_ms);
          info!(job_id = %job_id, frames, render_time_ms, "job_completed");
          EngineEvent::JobCompleted { job: job.clone() }
        }
        Ok(RenderOutcome::Cancelled) => {
          job.status = JobStatus::Cancelled;
          warn!(job_id = %job_id, progress = job.progress, "job_cancelled");
          EngineEvent::JobCancelled { job: job.clone() }
        }
        Err(e) => {
          job.status = JobStatus::Failed;
          job.error = Some(e.to_string());
          error!(job_id = %job_id, error = %e, "job_failed");
          EngineEvent::JobFailed { job: job.clone() }
        }
      }
    };

    self.inner.notifier.notify(finished);
    self.publish_stats();
  }
}

impl std::fmt::Debug for RenderScheduler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let stats = self.stats();
    f.debug_struct("RenderScheduler")
      .field("total_jobs", &stats.total_jobs)
      .field("queued_jobs", &stats.queued_jobs)
      .field("processing_jobs", &stats.processing_jobs)
      .finish()
  }
}
