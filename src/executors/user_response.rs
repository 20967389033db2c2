/// User response node: answers come from the run options, then the node's
/// default; with neither the node fails

use crate::diagram::{Node, NodeData, NodeType};
use crate::executors::{wrong_node_kind, Executor, ExecutorError, ExecutorOutput};
use crate::runtime::{ExecutionContext, ExecutionOptions};
use async_trait::async_trait;
use serde_json::json;

pub struct UserResponseExecutor;

#[async_trait]
impl Executor for UserResponseExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::UserResponse
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &ExecutionContext,
        options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let NodeData::UserResponse(data) = &node.data else {
            return Err(wrong_node_kind(node, NodeType::UserResponse));
        };

        let (answer, source) = match options.user_responses.get(&node.id) {
            Some(answer) => (answer.clone(), "provided"),
            None => match &data.default_response {
                Some(answer) => (answer.clone(), "default"),
                None => {
                    return Err(ExecutorError::Failed(anyhow::anyhow!(
                        "No response provided for user_response node '{}' (prompt: {})",
                        node.id,
                        data.prompt
                    )))
                }
            },
        };

        tracing::debug!("🙋 User response for {} ({})", node.id, source);
        Ok(ExecutorOutput::new(answer)
            .with_metadata("prompt", json!(data.prompt))
            .with_metadata("response_source", json!(source)))
    }
}
