/// Run results
///
/// What `ExecutionEngine::execute` hands back: the final context, run
/// metadata, the final outputs and every structured error.

use crate::runtime::context::ExecutionContext;
use crate::runtime::error::StructuredError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetadata {
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub total_cost: f64,
    pub node_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub context: ExecutionContext,
    pub metadata: ExecutionMetadata,
    /// Outputs of executed leaf nodes and endpoints
    pub final_outputs: Map<String, Value>,
    pub errors: Vec<StructuredError>,
}

impl ExecutionResult {
    pub fn status(&self) -> ExecutionStatus {
        self.metadata.status
    }

    pub fn execution_order(&self) -> &[String] {
        &self.context.execution_order
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.context.node_outputs.get(node_id)
    }
}
