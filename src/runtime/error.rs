/// Engine error taxonomy
///
/// Structural errors abort a run before or during scheduling, node errors are
/// scoped to a single node, iteration-limit errors guard cycles. Every variant
/// converts into a serializable [`StructuredError`] for the run result.

use crate::diagram::NodeType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Structural problems with the diagram or the run as a whole
#[derive(Debug, Clone, Error)]
pub enum DiagramExecutionError {
    #[error("Diagram has no start nodes")]
    NoStartNodes,

    #[error(
        "Node type '{node_type}' cannot be executed: {reason} (nodes: {})",
        node_ids.join(", ")
    )]
    UnsupportedNodeType {
        node_type: NodeType,
        reason: String,
        node_ids: Vec<String>,
    },

    #[error("Execution deadlocked: nodes [{}] can never have their dependencies met", .0.join(", "))]
    Deadlock(Vec<String>),

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorPhase {
    Validation,
    Execution,
}

#[derive(Debug, Clone, Error)]
#[error("Node '{node_id}' ({node_type}) failed during {phase:?}: {message}")]
pub struct NodeExecutionError {
    pub node_id: String,
    pub node_type: NodeType,
    pub phase: NodeErrorPhase,
    pub message: String,
}

#[derive(Debug, Clone, Error)]
pub enum MaxIterationsError {
    #[error("Node '{node_id}' exceeded the loop limit of {limit} executions")]
    NodeLimit { node_id: String, limit: u32 },

    #[error("Run exhausted its budget of {limit} passes with nodes still pending: [{}]", pending.join(", "))]
    PassBudget { limit: usize, pending: Vec<String> },
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Diagram(#[from] DiagramExecutionError),

    #[error(transparent)]
    Node(#[from] NodeExecutionError),

    #[error(transparent)]
    MaxIterations(#[from] MaxIterationsError),

    #[error("Execution aborted")]
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Diagram,
    Node,
    MaxIterations,
    Aborted,
}

/// Serializable error entry of an execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Diagram(_) => ErrorKind::Diagram,
            EngineError::Node(_) => ErrorKind::Node,
            EngineError::MaxIterations(_) => ErrorKind::MaxIterations,
            EngineError::Aborted => ErrorKind::Aborted,
        }
    }

    /// Node the error is scoped to, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            EngineError::Node(err) => Some(&err.node_id),
            EngineError::MaxIterations(MaxIterationsError::NodeLimit { node_id, .. }) => {
                Some(node_id)
            }
            _ => None,
        }
    }
}

impl From<&EngineError> for StructuredError {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind(),
            node_id: err.node_id().map(str::to_string),
            message: err.to_string(),
        }
    }
}
