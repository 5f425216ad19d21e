use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use artifex_engine::{NodeEngine, ProcessorRegistry};
use artifex_events::TracingNotifier;
use artifex_graph::Graph;
use artifex_model::{
  EngineConfig, FrameRange, GraphDef, JobKind, JobRequest, JobSource, JobStatus,
  ProcessingContext, Quality, RenderSettings,
};
use artifex_scheduler::RenderScheduler;

/// Artifex - node-graph evaluation and rendering for media pipelines
#[derive(Parser)]
#[command(name = "artifex")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.artifex)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to an engine config file (default: <data-dir>/config.json if present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a graph file for dangling edges, duplicate ids and cycles
  Validate {
    /// Path to the graph file (JSON)
    graph_file: PathBuf,
  },

  /// Evaluate one node and print its packets
  Eval {
    /// Path to the graph file (JSON)
    graph_file: PathBuf,

    /// The node ID to evaluate
    #[arg(long)]
    node: String,

    /// Time in seconds
    #[arg(long, default_value_t = 0.0)]
    time: f64,

    #[arg(long, default_value_t = 0)]
    frame: u64,

    /// draft, preview or final
    #[arg(long, default_value = "preview")]
    quality: Quality,
  },

  /// Render a frame range of one node through the scheduler
  Render {
    /// Path to the graph file (JSON)
    graph_file: PathBuf,

    /// The node ID to render
    #[arg(long)]
    node: String,

    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Last frame, inclusive
    #[arg(long, default_value_t = 0)]
    end: u64,

    #[arg(long, default_value_t = 24.0)]
    fps: f64,

    /// Encoder format (null, jsonl)
    #[arg(long, default_value = "jsonl")]
    format: String,

    /// Output path (default: <data-dir>/renders/<node>.jsonl)
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = "preview")]
    quality: Quality,

    /// Lower values start first
    #[arg(long, default_value_t = 0)]
    priority: u32,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".artifex"),
  };
  let config = load_config(cli.config.as_deref(), &data_dir)?;
  tracing::debug!(
    data_dir = %data_dir.display(),
    max_entries = config.cache.max_entries,
    max_concurrent_jobs = config.scheduler.max_concurrent_jobs,
    "config_loaded"
  );

  match cli.command {
    Some(Commands::Validate { graph_file }) => validate(graph_file)?,
    Some(Commands::Eval {
      graph_file,
      node,
      time,
      frame,
      quality,
    }) => {
      let ctx = ProcessingContext {
        frame_index: frame,
        quality,
        ..ProcessingContext::at(time)
      };
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { eval_async(graph_file, node, ctx, config).await })?;
    }
    Some(Commands::Render {
      graph_file,
      node,
      start,
      end,
      fps,
      format,
      output,
      quality,
      priority,
    }) => {
      let output =
        output.unwrap_or_else(|| data_dir.join("renders").join(format!("{}.jsonl", node)));
      let request = JobRequest {
        name: format!("{} [{}..={}]", node, start, end),
        kind: JobKind::Video,
        source: JobSource::Node { node_id: node },
        output,
        settings: RenderSettings::new(format, fps, FrameRange::new(start, end))
          .with_quality(quality),
      };
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { render_async(graph_file, request, priority, config).await })?;
    }
    None => {
      println!("artifex - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<EngineConfig> {
  let path = match explicit {
    Some(path) => path.to_path_buf(),
    None => {
      let default = data_dir.join("config.json");
      if !default.exists() {
        return Ok(EngineConfig::default());
      }
      default
    }
  };

  let content = std::fs::read_to_string(&path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

fn load_graph(graph_file: &Path) -> Result<GraphDef> {
  let content = std::fs::read_to_string(graph_file)
    .with_context(|| format!("failed to read graph file: {}", graph_file.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse graph file: {}", graph_file.display()))
}

fn build_engine(graph: GraphDef, config: &EngineConfig) -> NodeEngine {
  let engine = NodeEngine::builder(ProcessorRegistry::with_builtins())
    .config(config)
    .notifier(Arc::new(TracingNotifier))
    .build();
  let (nodes, edges) = graph.into_parts();
  engine.update_graph(nodes, edges);
  engine
}

fn validate(graph_file: PathBuf) -> Result<()> {
  let def = load_graph(&graph_file)?;
  let (nodes, edges) = def.into_parts();
  let graph = Graph::new(nodes, edges);

  graph
    .validate()
    .with_context(|| format!("graph {} is invalid", graph_file.display()))?;
  let order = graph.topological_order()?;

  eprintln!(
    "Graph is valid: {} nodes, {} edges",
    graph.node_count(),
    graph.edge_count()
  );
  println!("{}", serde_json::to_string_pretty(&order)?);
  Ok(())
}

async fn eval_async(
  graph_file: PathBuf,
  node_id: String,
  ctx: ProcessingContext,
  config: EngineConfig,
) -> Result<()> {
  let engine = build_engine(load_graph(&graph_file)?, &config);

  let packets = engine
    .evaluate(&node_id, &ctx, false)
    .await
    .with_context(|| format!("failed to evaluate node '{}'", node_id))?;

  let stats = engine.stats();
  eprintln!(
    "Evaluated {}: {} packet(s), {} node(s) processed",
    node_id,
    packets.len(),
    stats.evaluator.nodes_processed
  );
  println!("{}", serde_json::to_string_pretty(&packets)?);
  Ok(())
}

async fn render_async(
  graph_file: PathBuf,
  request: JobRequest,
  priority: u32,
  config: EngineConfig,
) -> Result<()> {
  let engine = Arc::new(build_engine(load_graph(&graph_file)?, &config));
  let scheduler = RenderScheduler::new(engine, &config.scheduler);

  let job_id = scheduler.add_render_job(request, priority);
  eprintln!("Queued job {}", job_id);

  // Ctrl-C cancels the job; the frame loop stops before its next frame.
  let cancel = CancellationToken::new();
  let interrupt = {
    let scheduler = scheduler.clone();
    let job_id = job_id.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
      tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
          if result.is_ok() {
            eprintln!("Interrupted, cancelling job {}", job_id);
            scheduler.cancel_render_job(&job_id);
          }
        }
      }
    })
  };

  scheduler.run_until_idle().await;
  cancel.cancel();
  interrupt.await.context("interrupt handler panicked")?;

  let job = scheduler
    .get_render_job(&job_id)
    .context("render job disappeared")?;
  println!("{}", serde_json::to_string_pretty(&job)?);

  match job.status {
    JobStatus::Completed => {
      eprintln!("Rendered to {}", job.output.display());
      Ok(())
    }
    JobStatus::Cancelled => bail!("render cancelled at {:.1}%", job.progress),
    _ => bail!(
      "render failed: {}",
      job.error.as_deref().unwrap_or("unknown error")
    ),
  }
}
