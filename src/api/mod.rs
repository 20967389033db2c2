/// HTTP API Layer
///
/// This module provides the REST API endpoints for running diagrams. It handles:
/// - Diagram execution with per-request options
/// - Static execution plans
/// - Executor discovery for the configured environment

// Execution, planning and executor listing endpoints
pub mod executions;

// Re-export router builder and state
pub use executions::{create_execution_routes, AppState};
