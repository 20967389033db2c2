/// Condition node
///
/// `expression` conditions are evaluated in the Lua sandbox with run variables
/// and upstream outputs flattened into globals, plus `inputs`, `outputs` and
/// `execution_count` tables. JavaScript-style operators are accepted.
/// `detect_max_iterations` conditions are true once every upstream
/// memory-bearing node has reached its iteration ceiling.

use crate::diagram::{ConditionData, ConditionType, Node, NodeData, NodeType};
use crate::executors::lua::{translate_js_operators, LuaSandbox};
use crate::executors::{
    is_truthy, wrong_node_kind, Executor, ExecutorError, ExecutorOutput, ValidationResult,
};
use crate::runtime::{ExecutionContext, ExecutionOptions};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub struct ConditionExecutor;

#[async_trait]
impl Executor for ConditionExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Condition
    }

    fn validate_inputs(&self, node: &Node, _ctx: &ExecutionContext) -> ValidationResult {
        let mut result = ValidationResult::ok();
        match &node.data {
            NodeData::Condition(data) => {
                if data.condition_type == ConditionType::Expression && data.expression.trim().is_empty() {
                    result.error(format!("Condition '{}' has no expression", node.id));
                }
            }
            _ => result.error(format!("Node '{}' is not a condition node", node.id)),
        }
        result
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let NodeData::Condition(data) = &node.data else {
            return Err(wrong_node_kind(node, NodeType::Condition));
        };

        let value = match data.condition_type {
            ConditionType::Expression => evaluate_expression(node, data, ctx)?,
            ConditionType::DetectMaxIterations => detect_max_iterations(node, ctx, options),
        };

        tracing::debug!("🔀 Condition {} evaluated to {}", node.id, value);
        Ok(ExecutorOutput::new(Value::Bool(value))
            .with_metadata("condition_type", json!(data.condition_type)))
    }
}

fn evaluate_expression(
    node: &Node,
    data: &ConditionData,
    ctx: &ExecutionContext,
) -> Result<bool, ExecutorError> {
    let inputs = ctx.inputs_for(&node.id);
    let expression = translate_js_operators(&data.expression);

    let sandbox = LuaSandbox::new()?;
    sandbox.flatten_into_globals(&ctx.variables)?;
    for value in inputs.values() {
        if let Value::Object(fields) = value {
            sandbox.flatten_into_globals(fields)?;
        }
    }
    sandbox.flatten_into_globals(&inputs)?;

    let outputs: Map<String, Value> = ctx
        .node_outputs
        .iter()
        .map(|(id, output)| (id.clone(), output.clone()))
        .collect();
    let counts: Map<String, Value> = ctx
        .node_execution_counts
        .iter()
        .map(|(id, count)| (id.clone(), json!(count)))
        .collect();
    sandbox.set_global("inputs", &Value::Object(inputs))?;
    sandbox.set_global("outputs", &Value::Object(outputs))?;
    sandbox.set_global("execution_count", &Value::Object(counts))?;

    let result = sandbox.eval(&expression).map_err(|e| {
        ExecutorError::Failed(e.context(format!("Condition '{}' failed: {}", node.id, data.expression)))
    })?;
    Ok(is_truthy(&result))
}

fn detect_max_iterations(node: &Node, ctx: &ExecutionContext, options: &ExecutionOptions) -> bool {
    let mut upstream = ctx
        .incoming_arrows(&node.id)
        .iter()
        .filter_map(|arrow| ctx.node(&arrow.source))
        .filter(|source| source.node_type().is_memory_bearing())
        .peekable();

    if upstream.peek().is_none() {
        return false;
    }
    upstream.all(|source| {
        let limit = source.max_iterations().unwrap_or(options.max_iterations);
        ctx.execution_count(&source.id) >= limit
    })
}
