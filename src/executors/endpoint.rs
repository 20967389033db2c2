/// Endpoint node
///
/// Passes its input through as the run's final value. With `save_to_file` it
/// also writes that value below the configured output root; without a root
/// configured the save fails closed.

use crate::diagram::{EndpointData, FileFormat, Node, NodeData, NodeType};
use crate::executors::{
    resolve_under, value_to_text, wrong_node_kind, Executor, ExecutorError, ExecutorOutput,
    ValidationResult,
};
use crate::runtime::{ExecutionContext, ExecutionOptions};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

pub struct EndpointExecutor {
    output_root: Option<PathBuf>,
}

impl EndpointExecutor {
    pub fn new(output_root: Option<PathBuf>) -> Self {
        Self { output_root }
    }

    async fn save(&self, node: &Node, data: &EndpointData, value: &Value) -> Result<PathBuf, ExecutorError> {
        let root = self.output_root.as_ref().ok_or_else(|| {
            ExecutorError::Configuration(format!(
                "Endpoint '{}' wants to save to a file but no output root is configured",
                node.id
            ))
        })?;
        let relative = data.file_path.as_deref().unwrap_or_default();
        let path = resolve_under(root, relative)?;

        let contents = match data.file_format {
            FileFormat::Json => serde_json::to_string_pretty(value).context("Failed to encode endpoint output")?,
            FileFormat::Text => value_to_text(value),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!("💾 Endpoint {} saved output to {}", node.id, path.display());
        Ok(path)
    }
}

#[async_trait]
impl Executor for EndpointExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Endpoint
    }

    fn validate_inputs(&self, node: &Node, _ctx: &ExecutionContext) -> ValidationResult {
        let mut result = ValidationResult::ok();
        if let NodeData::Endpoint(data) = &node.data {
            if data.save_to_file && data.file_path.as_deref().map_or(true, str::is_empty) {
                result.error(format!("Endpoint '{}' saves to file but has no file_path", node.id));
            }
        }
        result
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let NodeData::Endpoint(data) = &node.data else {
            return Err(wrong_node_kind(node, NodeType::Endpoint));
        };

        let mut inputs = ctx.inputs_for(&node.id);
        let value = match inputs.len() {
            0 => Value::Null,
            1 => inputs
                .values_mut()
                .next()
                .map(Value::take)
                .unwrap_or_default(),
            _ => Value::Object(inputs),
        };

        let mut output = ExecutorOutput::new(value);
        if data.save_to_file {
            let path = self.save(node, data, &output.output).await?;
            output = output.with_metadata("saved_to", json!(path.display().to_string()));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Arrow, Diagram};
    use crate::runtime::GraphIndex;
    use std::sync::Arc;

    fn saving_endpoint(path: &str, format: FileFormat) -> Node {
        Node::new(
            "e",
            NodeData::Endpoint(EndpointData {
                save_to_file: true,
                file_path: Some(path.to_string()),
                file_format: format,
                ..EndpointData::default()
            }),
        )
    }

    fn context_with_input(endpoint: &Node, value: Value) -> ExecutionContext {
        let diagram = Diagram {
            nodes: vec![Node::start("s", None), endpoint.clone()],
            arrows: vec![Arrow::new("a", "s", "e")],
        };
        let mut ctx = ExecutionContext::new("t", Arc::new(GraphIndex::build(&diagram)));
        ctx.node_outputs.insert("s".into(), value);
        ctx
    }

    #[tokio::test]
    async fn single_input_passes_through_unwrapped() {
        let node = Node::endpoint("e");
        let ctx = context_with_input(&node, json!({"answer": 42}));
        let out = EndpointExecutor::new(None)
            .execute(&node, &ctx, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(out.output, json!({"answer": 42}));
    }

    #[tokio::test]
    async fn saves_json_below_output_root() {
        let dir = tempfile::tempdir().unwrap();
        let node = saving_endpoint("results/out.json", FileFormat::Json);
        let ctx = context_with_input(&node, json!({"answer": 42}));

        let out = EndpointExecutor::new(Some(dir.path().to_path_buf()))
            .execute(&node, &ctx, &ExecutionOptions::default())
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("results/out.json")).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&written).unwrap(), json!({"answer": 42}));
        assert!(out.metadata.contains_key("saved_to"));
    }

    #[tokio::test]
    async fn save_without_root_fails_closed() {
        let node = saving_endpoint("out.txt", FileFormat::Text);
        let ctx = context_with_input(&node, json!("hello"));
        let result = EndpointExecutor::new(None)
            .execute(&node, &ctx, &ExecutionOptions::default())
            .await;
        assert!(matches!(result, Err(ExecutorError::Configuration(_))));
    }
}
