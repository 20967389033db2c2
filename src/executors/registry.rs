/// Hot-swappable executor registry using ArcSwap
///
/// Lookups are lock-free reads of the current map; registering an executor
/// clones the map and swaps the pointer, so in-flight runs keep the executors
/// they resolved while later runs see the new one.

use crate::config::{Config, ExecutionEnvironment};
use crate::diagram::NodeType;
use crate::executors::{
    condition::ConditionExecutor, db::DbExecutor, endpoint::EndpointExecutor, job::JobExecutor,
    notion::NotionExecutor, person_job::{LlmClient, PersonBatchJobExecutor, PersonJobExecutor},
    start::StartExecutor, user_response::UserResponseExecutor, Executor, ExecutorError,
    ExecutorFactory,
};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Node types available without credentials or external side effects
const SANDBOX_TYPES: [NodeType; 5] = [
    NodeType::Start,
    NodeType::Condition,
    NodeType::Job,
    NodeType::Endpoint,
    NodeType::UserResponse,
];

pub struct ExecutorRegistry {
    environment: ExecutionEnvironment,
    executors: ArcSwap<HashMap<NodeType, Arc<dyn Executor>>>,
}

impl ExecutorRegistry {
    /// Registry with no executors registered
    pub fn empty(environment: ExecutionEnvironment) -> Self {
        Self {
            environment,
            executors: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Registry with every built-in executor the configured environment allows
    pub fn from_config(config: &Config) -> Self {
        let registry = Self::empty(config.environment);

        registry.register(Arc::new(StartExecutor));
        registry.register(Arc::new(ConditionExecutor));
        registry.register(Arc::new(JobExecutor));
        registry.register(Arc::new(UserResponseExecutor));

        match config.environment {
            ExecutionEnvironment::Sandbox => {
                registry.register(Arc::new(EndpointExecutor::new(None)));
            }
            ExecutionEnvironment::Server => {
                let llm = Arc::new(LlmClient::from_config(&config.credentials));
                registry.register(Arc::new(EndpointExecutor::new(config.files.output_root.clone())));
                registry.register(Arc::new(PersonJobExecutor::new(llm.clone())));
                registry.register(Arc::new(PersonBatchJobExecutor::new(llm)));
                registry.register(Arc::new(DbExecutor::new(config.files.input_root.clone())));
                registry.register(Arc::new(NotionExecutor::from_config(&config.credentials)));
            }
        }

        tracing::info!(
            "🧰 Executor registry ready ({} environment, {} executors)",
            registry.environment,
            registry.executors.load().len()
        );
        registry
    }

    /// Sandbox registry with only the side-effect-free built-ins
    pub fn sandbox() -> Self {
        let config = Config {
            environment: ExecutionEnvironment::Sandbox,
            ..Config::default()
        };
        Self::from_config(&config)
    }

    pub fn environment(&self) -> ExecutionEnvironment {
        self.environment
    }

    /// Add or replace the executor for its node type (atomic pointer swap)
    pub fn register(&self, executor: Arc<dyn Executor>) {
        let node_type = executor.node_type();
        if !self.allows(node_type) {
            tracing::warn!(
                "🚫 Refusing to register {} executor in the {} environment",
                node_type,
                self.environment
            );
            return;
        }

        self.executors.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(node_type, executor.clone());
            next
        });
        tracing::debug!("🧰 Registered {} executor", node_type);
    }

    fn allows(&self, node_type: NodeType) -> bool {
        match self.environment {
            ExecutionEnvironment::Sandbox => SANDBOX_TYPES.contains(&node_type),
            ExecutionEnvironment::Server => true,
        }
    }
}

impl ExecutorFactory for ExecutorRegistry {
    fn create_executor(&self, node_type: NodeType) -> Result<Arc<dyn Executor>, ExecutorError> {
        if !self.allows(node_type) {
            return Err(ExecutorError::Unsupported(node_type, self.environment));
        }
        self.executors
            .load()
            .get(&node_type)
            .cloned()
            .ok_or_else(|| {
                ExecutorError::Configuration(format!("No executor registered for {} nodes", node_type))
            })
    }

    fn can_execute(&self, node_type: NodeType) -> bool {
        self.allows(node_type) && self.executors.load().contains_key(&node_type)
    }

    fn supported_node_types(&self) -> Vec<NodeType> {
        let executors = self.executors.load();
        NodeType::ALL
            .into_iter()
            .filter(|node_type| self.allows(*node_type) && executors.contains_key(node_type))
            .collect()
    }
}
