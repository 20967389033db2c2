/// Person job nodes
///
/// A person job sends one prompt to an OpenAI-compatible chat completion
/// endpoint: the first-only prompt on its first execution, the default prompt
/// afterwards, with `{{name}}` placeholders filled from the node's inputs.
/// The batch variant does the same once per item of an input array.

use crate::config::CredentialsConfig;
use crate::diagram::{Node, NodeData, NodeType, PersonJobData};
use crate::executors::{value_to_text, wrong_node_kind, Executor, ExecutorError, ExecutorOutput, ValidationResult};
use crate::runtime::{ExecutionContext, ExecutionOptions};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Minimal client for `/chat/completions`
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    input_price_per_1k: f64,
    output_price_per_1k: f64,
}

/// One completion with its token-priced cost
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl LlmClient {
    pub fn from_config(credentials: &CredentialsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: credentials.llm_base_url.trim_end_matches('/').to_string(),
            api_key: credentials.llm_api_key.clone(),
            input_price_per_1k: credentials.llm_input_price_per_1k,
            output_price_per_1k: credentials.llm_output_price_per_1k,
        }
    }

    pub async fn complete(
        &self,
        model: &str,
        system_prompt: Option<&str>,
        prompt: &str,
    ) -> Result<Completion, ExecutorError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ExecutorError::Configuration("No LLM API key configured (DIAGRUN_LLM_API_KEY)".to_string())
        })?;

        let mut messages = Vec::new();
        if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!("🤖 Chat completion request to {} (model {})", url, model);

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({ "model": model, "messages": messages }))
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Chat completion returned {}: {}", status, body).into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to decode chat completion response")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let usage = parsed.usage.unwrap_or_default();
        let cost = usage.prompt_tokens as f64 / 1000.0 * self.input_price_per_1k
            + usage.completion_tokens as f64 / 1000.0 * self.output_price_per_1k;

        Ok(Completion {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost,
        })
    }
}

/// First-only prompt on the node's first execution, default prompt afterwards
pub fn select_prompt<'a>(data: &'a PersonJobData, execution_count: u32) -> &'a str {
    if execution_count == 0 && !data.first_only_prompt.trim().is_empty() {
        &data.first_only_prompt
    } else {
        &data.default_prompt
    }
}

/// Replace `{{name}}` placeholders with the matching input values
pub fn substitute(template: &str, values: &Map<String, Value>) -> String {
    values.iter().fold(template.to_string(), |rendered, (name, value)| {
        rendered.replace(&format!("{{{{{}}}}}", name), &value_to_text(value))
    })
}

fn validate_person(node: &Node, data: &PersonJobData) -> ValidationResult {
    let mut result = ValidationResult::ok();
    if data.person.model.trim().is_empty() {
        result.error(format!("Person job '{}' has no model configured", node.id));
    }
    if data.default_prompt.trim().is_empty() && data.first_only_prompt.trim().is_empty() {
        result.error(format!("Person job '{}' has no prompt", node.id));
    }
    result
}

fn completion_metadata(completion: &Completion) -> Value {
    json!({
        "prompt_tokens": completion.prompt_tokens,
        "completion_tokens": completion.completion_tokens,
    })
}

pub struct PersonJobExecutor {
    llm: Arc<LlmClient>,
}

impl PersonJobExecutor {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Executor for PersonJobExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::PersonJob
    }

    fn validate_inputs(&self, node: &Node, _ctx: &ExecutionContext) -> ValidationResult {
        match &node.data {
            NodeData::PersonJob(data) => validate_person(node, data),
            _ => {
                let mut result = ValidationResult::ok();
                result.error(format!("Node '{}' is not a person_job node", node.id));
                result
            }
        }
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let NodeData::PersonJob(data) = &node.data else {
            return Err(wrong_node_kind(node, NodeType::PersonJob));
        };

        let inputs = ctx.inputs_for(&node.id);
        let prompt = substitute(select_prompt(data, ctx.execution_count(&node.id)), &inputs);
        let completion = self
            .llm
            .complete(&data.person.model, data.person.system_prompt.as_deref(), &prompt)
            .await?;

        tracing::info!("🤖 Person job {} answered (${:.5})", node.id, completion.cost);
        Ok(ExecutorOutput::new(Value::String(completion.text.clone()))
            .with_cost(completion.cost)
            .with_metadata("usage", completion_metadata(&completion))
            .with_metadata("model", json!(data.person.model)))
    }
}

pub struct PersonBatchJobExecutor {
    llm: Arc<LlmClient>,
}

impl PersonBatchJobExecutor {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Executor for PersonBatchJobExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::PersonBatchJob
    }

    fn validate_inputs(&self, node: &Node, ctx: &ExecutionContext) -> ValidationResult {
        let NodeData::PersonBatchJob(data) = &node.data else {
            let mut result = ValidationResult::ok();
            result.error(format!("Node '{}' is not a person_batch_job node", node.id));
            return result;
        };

        let mut result = validate_person(node, &data.job);
        match ctx.inputs_for(&node.id).get(&data.batch_input_key) {
            Some(Value::Array(_)) => {}
            Some(_) => result.error(format!(
                "Input '{}' of batch job '{}' is not an array",
                data.batch_input_key, node.id
            )),
            None => result.warn(format!(
                "Batch job '{}' has no '{}' input; it will process nothing",
                node.id, data.batch_input_key
            )),
        }
        result
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let NodeData::PersonBatchJob(data) = &node.data else {
            return Err(wrong_node_kind(node, NodeType::PersonBatchJob));
        };

        let inputs = ctx.inputs_for(&node.id);
        let items = match inputs.get(&data.batch_input_key) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let template = select_prompt(&data.job, ctx.execution_count(&node.id));

        let mut answers = Vec::with_capacity(items.len());
        let mut total_cost = 0.0;
        for (index, item) in items.into_iter().enumerate() {
            let mut values = inputs.clone();
            values.insert("item".to_string(), item);
            values.insert("index".to_string(), json!(index));

            let completion = self
                .llm
                .complete(
                    &data.job.person.model,
                    data.job.person.system_prompt.as_deref(),
                    &substitute(template, &values),
                )
                .await?;
            total_cost += completion.cost;
            answers.push(Value::String(completion.text));
        }

        tracing::info!("🤖 Batch job {} processed {} items (${:.5})", node.id, answers.len(), total_cost);
        Ok(ExecutorOutput::new(json!({ "results": answers, "count": answers.len() }))
            .with_cost(total_cost)
            .with_metadata("model", json!(data.job.person.model)))
    }
}
