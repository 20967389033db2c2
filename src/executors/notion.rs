/// Notion node: reads a page's block children or appends the node's input as
/// a paragraph, through the Notion REST API

use crate::config::CredentialsConfig;
use crate::diagram::{Node, NodeData, NodeType, NotionOperation};
use crate::executors::{value_to_text, wrong_node_kind, Executor, ExecutorError, ExecutorOutput, ValidationResult};
use crate::runtime::{ExecutionContext, ExecutionOptions};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

const NOTION_VERSION: &str = "2022-06-28";

pub struct NotionExecutor {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl NotionExecutor {
    pub fn from_config(credentials: &CredentialsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: credentials.notion_base_url.trim_end_matches('/').to_string(),
            token: credentials.notion_token.clone(),
        }
    }
}

/// Paragraph block body for `PATCH /blocks/{id}/children`
pub fn paragraph_children(text: &str) -> Value {
    json!({
        "children": [{
            "object": "block",
            "type": "paragraph",
            "paragraph": {
                "rich_text": [{ "type": "text", "text": { "content": text } }]
            }
        }]
    })
}

#[async_trait]
impl Executor for NotionExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Notion
    }

    fn validate_inputs(&self, node: &Node, _ctx: &ExecutionContext) -> ValidationResult {
        let mut result = ValidationResult::ok();
        if let NodeData::Notion(data) = &node.data {
            if data.page_id.trim().is_empty() {
                result.error(format!("Notion node '{}' has no page_id", node.id));
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
        let NodeData::Notion(data) = &node.data else {
            return Err(wrong_node_kind(node, NodeType::Notion));
        };
        let token = self.token.as_deref().ok_or_else(|| {
            ExecutorError::Configuration("No Notion token configured (DIAGRUN_NOTION_TOKEN)".to_string())
        })?;

        let url = format!("{}/blocks/{}/children", self.base_url, data.page_id);
        let request = match data.operation {
            NotionOperation::ReadPage => self.http.get(&url),
            NotionOperation::AppendBlocks => {
                let text = ctx
                    .inputs_for(&node.id)
                    .values()
                    .map(value_to_text)
                    .collect::<Vec<_>>()
                    .join("\n");
                self.http.patch(&url).json(&paragraph_children(&text))
            }
        };

        tracing::debug!("📝 Notion {:?} on page {}", data.operation, data.page_id);
        let response = request
            .bearer_auth(token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .context("Notion request failed")?;

        let status = response.status();
        let body: Value = response.json().await.context("Failed to decode Notion response")?;
        if !status.is_success() {
            return Err(anyhow::anyhow!("Notion returned {}: {}", status, body).into());
        }

        let output = match data.operation {
            NotionOperation::ReadPage => body.get("results").cloned().unwrap_or(Value::Array(Vec::new())),
            NotionOperation::AppendBlocks => body,
        };
        Ok(ExecutorOutput::new(output).with_metadata("page_id", json!(data.page_id)))
    }
}
