//! Artifex node engine
//!
//! Evaluates a node graph on demand, memoizing every node result per
//! processing context.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        NodeEngine                           │
//! │  - update_graph(nodes, edges) swaps graph + generation      │
//! │  - invalidation policy decides what the cache drops         │
//! │  - run_cache_sweeper(cancel) drives the TTL sweep           │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Evaluator                            │
//! │  - evaluate(graph, gen, node, ctx, force) → packets         │
//! │  - recursive upstream evaluation, reentrancy guard          │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                             │
//!                 ▼                             ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │         NodeCache         │   │      ProcessorRegistry      │
//! │  - capacity + TTL bounded │   │  - type tag → NodeProcessor │
//! └───────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use artifex_engine::{NodeEngine, ProcessorRegistry};
//! use artifex_model::ProcessingContext;
//!
//! let engine = NodeEngine::new(ProcessorRegistry::with_builtins());
//! engine.update_graph(nodes, edges);
//!
//! let packets = engine.evaluate("out", &ProcessingContext::at(0.0), false).await?;
//! ```

mod builtin;
mod cache;
mod clock;
mod engine;
mod error;
mod evaluator;
mod invalidation;
mod key;
mod processor;
mod stats;

pub use builtin::{
  AiGeneratorProcessor, ColorCorrectProcessor, CompositeProcessor, InputProcessor,
  OutputProcessor, provider_for_task,
};
pub use cache::{CacheEntry, CacheEntryInfo, CacheInfo, NodeCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use engine::{NodeEngine, NodeEngineBuilder};
pub use error::{EvalError, ProcessError};
pub use evaluator::Evaluator;
pub use invalidation::{ClearAll, DependencyScoped, InvalidationPolicy, policy_for};
pub use key::CacheKey;
pub use processor::{
  FnProcessor, NodeInputs, NodeProcessor, OUTPUT_HANDLE_KEY, ProcessorRegistry, packets_for_handle,
};
pub use stats::{EngineStats, EvaluatorStats};
