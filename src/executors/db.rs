/// DB node: reads a file below the configured input root, or emits a fixed
/// prompt verbatim

use crate::diagram::{DbSubType, Node, NodeData, NodeType};
use crate::executors::{resolve_under, wrong_node_kind, Executor, ExecutorError, ExecutorOutput, ValidationResult};
use crate::runtime::{ExecutionContext, ExecutionOptions};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

pub struct DbExecutor {
    input_root: Option<PathBuf>,
}

impl DbExecutor {
    pub fn new(input_root: Option<PathBuf>) -> Self {
        Self { input_root }
    }
}

#[async_trait]
impl Executor for DbExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Db
    }

    fn validate_inputs(&self, node: &Node, _ctx: &ExecutionContext) -> ValidationResult {
        let mut result = ValidationResult::ok();
        if let NodeData::Db(data) = &node.data {
            if data.source_details.trim().is_empty() {
                result.error(format!("DB node '{}' has no source_details", node.id));
            }
        }
        result
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &ExecutionContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let NodeData::Db(data) = &node.data else {
            return Err(wrong_node_kind(node, NodeType::Db));
        };

        match data.sub_type {
            DbSubType::FixedPrompt => Ok(ExecutorOutput::new(Value::String(data.source_details.clone()))),
            DbSubType::File => {
                let root = self.input_root.as_ref().ok_or_else(|| {
                    ExecutorError::Configuration(format!(
                        "DB node '{}' reads a file but no input root is configured",
                        node.id
                    ))
                })?;
                let path = resolve_under(root, data.source_details.trim())?;
                let contents = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;

                tracing::debug!("📂 DB node {} read {} bytes from {}", node.id, contents.len(), path.display());
                Ok(ExecutorOutput::new(Value::String(contents))
                    .with_metadata("source", json!(path.display().to_string())))
            }
        }
    }
}
