/// diagrun: execution engine for node/arrow workflow diagrams
///
/// This library loads diagrams, resolves their dependencies, runs conditional
/// branches and bounded loops, and dispatches nodes to pluggable executors.

// Core configuration and setup
pub mod config;

// Diagram definitions and import normalization
pub mod diagram;

// Executor contract, registry and built-in node executors
pub mod executors;

// Runtime execution engine - dependency resolution, loops, skips and dispatch
pub mod runtime;

// HTTP API layer - execution, planning and executor listing
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use diagram::{Arrow, Branch, Diagram, Node, NodeData, NodeType};
pub use executors::{Executor, ExecutorFactory, ExecutorRegistry};
pub use runtime::{ExecutionEngine, ExecutionOptions, ExecutionResult, ExecutionStatus};
pub use server::start_server;
