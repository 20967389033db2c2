//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use diagrun::config::ExecutionEnvironment;
use diagrun::diagram::{Node, NodeData, NodeType, PersonJobData};
use diagrun::executors::condition::ConditionExecutor;
use diagrun::executors::endpoint::EndpointExecutor;
use diagrun::executors::job::JobExecutor;
use diagrun::executors::start::StartExecutor;
use diagrun::executors::{Executor, ExecutorError, ExecutorOutput, ExecutorRegistry};
use diagrun::runtime::{ExecutionContext, ExecutionOptions};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Stand-in for an LLM-backed person job: answers with its id and how often
/// it already ran, at a fixed cost
pub struct EchoPersonExecutor;

#[async_trait]
impl Executor for EchoPersonExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::PersonJob
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let round = ctx.execution_count(&node.id);
        Ok(ExecutorOutput::new(json!(format!("{}#{}", node.id, round))).with_cost(0.5))
    }
}

/// DB executor that just sleeps before answering
pub struct SlowDbExecutor(pub Duration);

#[async_trait]
impl Executor for SlowDbExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Db
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &ExecutionContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        tokio::time::sleep(self.0).await;
        Ok(ExecutorOutput::new(json!(node.id)))
    }
}

/// Start executor without the incoming-arrow rule, for driving a start node
/// around a loop
pub struct LoopingStartExecutor;

#[async_trait]
impl Executor for LoopingStartExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Start
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &ExecutionContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutorOutput, ExecutorError> {
        Ok(ExecutorOutput::new(json!(node.id)))
    }
}

/// Server registry with the side-effect-free built-ins plus the mocks above
pub fn test_registry() -> Arc<ExecutorRegistry> {
    let registry = ExecutorRegistry::empty(ExecutionEnvironment::Server);
    registry.register(Arc::new(StartExecutor));
    registry.register(Arc::new(ConditionExecutor));
    registry.register(Arc::new(JobExecutor));
    registry.register(Arc::new(EndpointExecutor::new(None)));
    registry.register(Arc::new(EchoPersonExecutor));
    registry.register(Arc::new(SlowDbExecutor(Duration::from_secs(2))));
    Arc::new(registry)
}

pub fn person(id: &str) -> Node {
    Node::new(id, NodeData::PersonJob(PersonJobData::default()))
}

pub fn person_with_ceiling(id: &str, max_iterations: u32) -> Node {
    Node::new(
        id,
        NodeData::PersonJob(PersonJobData {
            max_iterations: Some(max_iterations),
            ..PersonJobData::default()
        }),
    )
}

pub fn slow_db(id: &str) -> Node {
    Node::new(id, NodeData::Db(Default::default()))
}
