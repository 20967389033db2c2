/// Job node: runs a Lua script with `inputs`, `outputs` and `variables` in
/// scope and emits whatever the script returns

use crate::diagram::{JobData, Node, NodeData, NodeType};
use crate::executors::lua::LuaSandbox;
use crate::executors::{wrong_node_kind, Executor, ExecutorError, ExecutorOutput, ValidationResult};
use crate::runtime::{ExecutionContext, ExecutionOptions};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub struct JobExecutor;

#[async_trait]
impl Executor for JobExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Job
    }

    fn validate_inputs(&self, node: &Node, _ctx: &ExecutionContext) -> ValidationResult {
        let mut result = ValidationResult::ok();
        let NodeData::Job(data) = &node.data else {
            result.error(format!("Node '{}' is not a job node", node.id));
            return result;
        };
        if !data.language.eq_ignore_ascii_case("lua") {
            result.error(format!("Unsupported job language '{}'", data.language));
        }
        if data.code.trim().is_empty() {
            result.warn(format!("Job '{}' has no code and will output null", node.id));
        }
        result
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let NodeData::Job(data) = &node.data else {
            return Err(wrong_node_kind(node, NodeType::Job));
        };

        tracing::debug!("🧠 Executing job {}", node.id);
        let output = run_script(node, data, ctx)?;
        Ok(ExecutorOutput::new(output))
    }
}

fn run_script(node: &Node, data: &JobData, ctx: &ExecutionContext) -> Result<Value, ExecutorError> {
    if data.code.trim().is_empty() {
        return Ok(Value::Null);
    }

    let outputs: Map<String, Value> = ctx
        .node_outputs
        .iter()
        .map(|(id, output)| (id.clone(), output.clone()))
        .collect();

    let sandbox = LuaSandbox::new()?;
    sandbox.set_global("inputs", &Value::Object(ctx.inputs_for(&node.id)))?;
    sandbox.set_global("outputs", &Value::Object(outputs))?;
    sandbox.set_global("variables", &Value::Object(ctx.variables.clone()))?;

    sandbox
        .eval(&data.code)
        .map_err(|e| ExecutorError::Failed(e.context(format!("Job '{}' script failed", node.id))))
}
