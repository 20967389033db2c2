/// Runtime Execution Engine
///
/// This module turns a diagram into a dependency-correct, cycle-tolerant run.
/// It handles:
/// - Indexing nodes and arrows for constant-time lookups
/// - Dependency resolution, branch pruning and cycle detection
/// - Loop bounding and explicit node skipping
/// - Concurrent dispatch of ready nodes with tokio
/// - Lifecycle events and structured results

// Node/arrow lookup tables built once per run
pub mod graph;

// Dependency satisfaction, successors, cycles and ordering
pub mod resolver;

// Bounds re-execution of cyclic nodes
pub mod loops;

// Explicitly excluded nodes
pub mod skip;

// Per-run mutable state and run options
pub mod context;

// Run results returned to callers
pub mod result;

// Engine error taxonomy
pub mod error;

// Lifecycle events and stream sinks
pub mod events;

// Static execution plans for inspection
pub mod planner;

// Core execution engine
pub mod engine;

// Re-export main types
pub use context::{ExecutionContext, ExecutionOptions};
pub use engine::ExecutionEngine;
pub use error::{
    DiagramExecutionError, EngineError, ErrorKind, MaxIterationsError, NodeErrorPhase,
    NodeExecutionError, StructuredError,
};
pub use events::{BroadcastSink, StreamSink, StreamUpdate, TracingSink, UpdateType};
pub use graph::GraphIndex;
pub use loops::LoopController;
pub use planner::ExecutionPlan;
pub use resolver::{DependencyCheck, DependencyResolver, UnmetReason};
pub use result::{ExecutionMetadata, ExecutionResult, ExecutionStatus};
pub use skip::{SkipManager, SkipReason};
