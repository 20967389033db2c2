/// Start node: seeds the run with its configured output or the run variables

use crate::diagram::{Node, NodeData, NodeType};
use crate::executors::{wrong_node_kind, Executor, ExecutorError, ExecutorOutput, ValidationResult};
use crate::runtime::{ExecutionContext, ExecutionOptions};
use async_trait::async_trait;
use serde_json::Value;

pub struct StartExecutor;

#[async_trait]
impl Executor for StartExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Start
    }

    fn validate_inputs(&self, node: &Node, ctx: &ExecutionContext) -> ValidationResult {
        let mut result = ValidationResult::ok();
        let incoming = ctx.incoming_arrows(&node.id);
        if !incoming.is_empty() {
            let sources: Vec<&str> = incoming.iter().map(|arrow| arrow.source.as_str()).collect();
            result.error(format!(
                "Start node '{}' must not have incoming arrows (from: {})",
                node.id,
                sources.join(", ")
            ));
        }
        result
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let NodeData::Start(data) = &node.data else {
            return Err(wrong_node_kind(node, NodeType::Start));
        };

        let output = data
            .output
            .clone()
            .unwrap_or_else(|| Value::Object(ctx.variables.clone()));
        Ok(ExecutorOutput::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Arrow, Diagram};
    use crate::runtime::GraphIndex;
    use std::sync::Arc;

    fn context(diagram: &Diagram) -> ExecutionContext {
        ExecutionContext::new("test", Arc::new(GraphIndex::build(diagram)))
    }

    #[test]
    fn start_nodes_reject_incoming_arrows() {
        let diagram = Diagram {
            nodes: vec![Node::start("s", None), Node::job("j", "return 1")],
            arrows: vec![Arrow::new("s-j", "s", "j"), Arrow::new("j-s", "j", "s")],
        };
        let validation = StartExecutor.validate_inputs(&diagram.nodes[0], &context(&diagram));

        assert!(!validation.is_valid);
        assert_eq!(validation.errors.len(), 1);
        assert!(validation.errors[0].contains("from: j"));
    }

    #[test]
    fn plain_start_nodes_are_valid() {
        let diagram = Diagram {
            nodes: vec![Node::start("s", None), Node::job("j", "return 1")],
            arrows: vec![Arrow::new("s-j", "s", "j")],
        };
        let validation = StartExecutor.validate_inputs(&diagram.nodes[0], &context(&diagram));
        assert!(validation.is_valid, "errors: {:?}", validation.errors);
    }

    #[tokio::test]
    async fn falls_back_to_run_variables() {
        let diagram = Diagram {
            nodes: vec![Node::start("s", None)],
            arrows: vec![],
        };
        let mut ctx = context(&diagram);
        ctx.variables.insert("topic".into(), Value::from("tabs"));

        let out = StartExecutor
            .execute(&diagram.nodes[0], &ctx, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(out.output, serde_json::json!({ "topic": "tabs" }));
    }
}
