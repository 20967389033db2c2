/// Executor Layer
///
/// The contract between the engine and per-node-type execution logic, the
/// hot-swappable registry that resolves a node type to its executor, and the
/// built-in executors.

use crate::config::ExecutionEnvironment;
use crate::diagram::{Node, NodeType};
use crate::runtime::{ExecutionContext, ExecutionOptions};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

// Lock-free executor registry
pub mod registry;

// Embedded Lua sandbox for condition and job nodes
pub mod lua;

// Built-in executors, one per node type
pub mod condition;
pub mod db;
pub mod endpoint;
pub mod job;
pub mod notion;
pub mod person_job;
pub mod start;
pub mod user_response;

pub use registry::ExecutorRegistry;

/// Outcome of a pure pre-execution check
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// What an executor hands back to the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutorOutput {
    pub output: Value,
    pub cost: f64,
    pub metadata: Map<String, Value>,
}

impl ExecutorOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Node type '{0}' is not supported in the {1} environment")]
    Unsupported(NodeType, ExecutionEnvironment),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Per-node-type execution logic
///
/// `validate_inputs` is pure. `execute` sees a read-only snapshot of the run
/// context and must not rely on anything it cannot read from it.
#[async_trait]
pub trait Executor: Send + Sync {
    fn node_type(&self) -> NodeType;

    fn validate_inputs(&self, _node: &Node, _ctx: &ExecutionContext) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError>;
}

/// Resolves node types to executors
pub trait ExecutorFactory: Send + Sync {
    fn create_executor(&self, node_type: NodeType) -> Result<Arc<dyn Executor>, ExecutorError>;

    fn can_execute(&self, node_type: NodeType) -> bool;

    fn supported_node_types(&self) -> Vec<NodeType>;
}

/// Error for an executor handed a node of another kind
pub(crate) fn wrong_node_kind(node: &Node, expected: NodeType) -> ExecutorError {
    ExecutorError::Configuration(format!(
        "Node '{}' is a {} node, expected {}",
        node.id,
        node.node_type(),
        expected
    ))
}

/// Condition-style truthiness: null, false, zero and empty values are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a value for prompt or file text: strings verbatim, everything else as JSON
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Join a relative path onto a root, refusing anything that could escape it
pub(crate) fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf, ExecutorError> {
    let candidate = Path::new(relative);
    let escapes = relative.is_empty()
        || candidate.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });
    if escapes {
        return Err(ExecutorError::Configuration(format!(
            "Path '{}' must be relative to {} and stay inside it",
            relative,
            root.display()
        )));
    }
    Ok(root.join(candidate))
}
