/// Per-run execution state and run options
///
/// An `ExecutionContext` is created for every run and handed back inside the
/// result. Executors only ever see a read-only snapshot of it; all writes go
/// through the engine.

use crate::config::ExecutionConfig;
use crate::diagram::{Arrow, Node, NodeType};
use crate::runtime::graph::GraphIndex;
use crate::runtime::skip::SkipReason;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub execution_id: String,
    /// Graph Index of the diagram being run
    #[serde(skip)]
    pub graph: Arc<GraphIndex>,
    pub node_outputs: HashMap<String, Value>,
    pub node_execution_counts: HashMap<String, u32>,
    pub condition_values: HashMap<String, bool>,
    /// Append-only record of node completions
    pub execution_order: Vec<String>,
    pub first_only_consumed: HashSet<String>,
    pub executed_nodes: HashSet<String>,
    pub skipped_nodes: HashMap<String, SkipReason>,
    pub errors: HashMap<String, String>,
    pub total_cost: f64,
    pub variables: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>, graph: Arc<GraphIndex>) -> Self {
        Self {
            execution_id: execution_id.into(),
            graph,
            node_outputs: HashMap::new(),
            node_execution_counts: HashMap::new(),
            condition_values: HashMap::new(),
            execution_order: Vec::new(),
            first_only_consumed: HashSet::new(),
            executed_nodes: HashSet::new(),
            skipped_nodes: HashMap::new(),
            errors: HashMap::new(),
            total_cost: 0.0,
            variables: Map::new(),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.graph.node(node_id)
    }

    pub fn nodes_by_id(&self) -> &HashMap<String, Node> {
        self.graph.nodes_by_id()
    }

    pub fn incoming_arrows(&self, node_id: &str) -> &[Arrow] {
        self.graph.incoming(node_id)
    }

    pub fn outgoing_arrows(&self, node_id: &str) -> &[Arrow] {
        self.graph.outgoing(node_id)
    }

    pub fn execution_count(&self, node_id: &str) -> u32 {
        self.node_execution_counts.get(node_id).copied().unwrap_or(0)
    }

    pub fn is_first_only_consumed(&self, node_id: &str) -> bool {
        self.first_only_consumed.contains(node_id)
    }

    /// Outputs of a node's incoming arrows keyed by arrow label (or source id)
    ///
    /// First-only arrows drop out once the node consumed its first-only input.
    /// Arrows leaving a condition on the branch it did not take contribute nothing.
    pub fn inputs_for(&self, node_id: &str) -> Map<String, Value> {
        let consumed = self.is_first_only_consumed(node_id);
        let mut inputs = Map::new();

        for arrow in self.graph.incoming(node_id) {
            if arrow.is_first_only() && consumed {
                continue;
            }
            if let Some(branch) = arrow.branch() {
                let from_condition = self
                    .graph
                    .node(&arrow.source)
                    .is_some_and(|source| source.node_type() == NodeType::Condition);
                if from_condition
                    && !self
                        .condition_values
                        .get(&arrow.source)
                        .is_some_and(|value| branch.matches(*value))
                {
                    continue;
                }
            }
            if let Some(output) = self.node_outputs.get(&arrow.source) {
                inputs.insert(arrow.input_name().to_string(), output.clone());
            }
        }

        inputs
    }
}

/// Options controlling a single run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Loop limit for cyclic nodes; also scales the run's pass budget
    pub max_iterations: u32,
    #[serde(rename = "timeout_secs", with = "duration_secs")]
    pub timeout: Duration,
    pub skip_validation: bool,
    /// Record node failures and keep going instead of failing the run
    pub debug_mode: bool,
    pub max_concurrency: usize,
    pub variables: Map<String, Value>,
    pub skip_nodes: Vec<String>,
    /// Canned answers for user_response nodes, keyed by node id
    pub user_responses: HashMap<String, Value>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            timeout: Duration::from_secs(300),
            skip_validation: false,
            debug_mode: false,
            max_concurrency: 8,
            variables: Map::new(),
            skip_nodes: Vec::new(),
            user_responses: HashMap::new(),
        }
    }
}

impl ExecutionOptions {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            timeout: Duration::from_secs(config.timeout_secs),
            debug_mode: config.debug_mode,
            max_concurrency: config.max_concurrency,
            ..Self::default()
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
