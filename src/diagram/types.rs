/// Core diagram type definitions
///
/// Defines nodes, arrows and the per-kind node data consumed by the execution
/// engine. Node data is a tagged variant per node kind; fields the engine or the
/// built-in executors never inspect land in each variant's `extra` map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A complete diagram: typed nodes connected by directed arrows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagram {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub arrows: Vec<Arrow>,
}

/// A single node in the diagram
///
/// Serialized as `{"id": "...", "type": "condition", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the diagram
    pub id: String,
    /// Node kind together with its kind-specific parameters
    #[serde(flatten)]
    pub data: NodeData,
}

/// Closed set of node types understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Condition,
    Job,
    PersonJob,
    PersonBatchJob,
    Db,
    Endpoint,
    UserResponse,
    Notion,
}

impl NodeType {
    pub const ALL: [NodeType; 9] = [
        NodeType::Start,
        NodeType::Condition,
        NodeType::Job,
        NodeType::PersonJob,
        NodeType::PersonBatchJob,
        NodeType::Db,
        NodeType::Endpoint,
        NodeType::UserResponse,
        NodeType::Notion,
    ];

    /// Wire name of the type (`person_job`, `db`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Condition => "condition",
            NodeType::Job => "job",
            NodeType::PersonJob => "person_job",
            NodeType::PersonBatchJob => "person_batch_job",
            NodeType::Db => "db",
            NodeType::Endpoint => "endpoint",
            NodeType::UserResponse => "user_response",
            NodeType::Notion => "notion",
        }
    }

    /// Memory-bearing nodes carry loop state and may start on a first-only input
    /// alone, before their default inputs are available.
    pub fn is_memory_bearing(&self) -> bool {
        matches!(self, NodeType::PersonJob | NodeType::PersonBatchJob)
    }

    /// Privileged nodes need credentials or external I/O to run
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            NodeType::PersonJob | NodeType::PersonBatchJob | NodeType::Db | NodeType::Notion
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific node parameters, adjacently tagged by `type`/`data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeData {
    Start(StartData),
    Condition(ConditionData),
    Job(JobData),
    PersonJob(PersonJobData),
    PersonBatchJob(PersonBatchJobData),
    Db(DbData),
    Endpoint(EndpointData),
    UserResponse(UserResponseData),
    Notion(NotionData),
}

/// Start node: emits `output`, or the run variables when absent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    #[default]
    Expression,
    /// True once every upstream memory-bearing node hit its iteration ceiling
    DetectMaxIterations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionData {
    #[serde(default)]
    pub condition_type: ConditionType,
    #[serde(default)]
    pub expression: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub code: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_language() -> String {
    "lua".to_string()
}

/// LLM persona used by person jobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonConfig {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonJobData {
    #[serde(default)]
    pub person: PersonConfig,
    #[serde(default)]
    pub first_only_prompt: String,
    #[serde(default)]
    pub default_prompt: String,
    /// Per-node ceiling; once reached the node is skipped instead of re-run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonBatchJobData {
    #[serde(flatten)]
    pub job: PersonJobData,
    /// Input holding the array to fan out over
    #[serde(default = "default_batch_key")]
    pub batch_input_key: String,
}

fn default_batch_key() -> String {
    "items".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbSubType {
    #[default]
    File,
    FixedPrompt,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbData {
    #[serde(default)]
    pub sub_type: DbSubType,
    #[serde(default)]
    pub source_details: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointData {
    #[serde(default)]
    pub save_to_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_format: FileFormat,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserResponseData {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_response: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotionOperation {
    #[default]
    ReadPage,
    AppendBlocks,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotionData {
    #[serde(default)]
    pub operation: NotionOperation,
    #[serde(default)]
    pub page_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeData {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeData::Start(_) => NodeType::Start,
            NodeData::Condition(_) => NodeType::Condition,
            NodeData::Job(_) => NodeType::Job,
            NodeData::PersonJob(_) => NodeType::PersonJob,
            NodeData::PersonBatchJob(_) => NodeType::PersonBatchJob,
            NodeData::Db(_) => NodeType::Db,
            NodeData::Endpoint(_) => NodeType::Endpoint,
            NodeData::UserResponse(_) => NodeType::UserResponse,
            NodeData::Notion(_) => NodeType::Notion,
        }
    }
}

impl Node {
    pub fn new(id: impl Into<String>, data: NodeData) -> Self {
        Self { id: id.into(), data }
    }

    pub fn start(id: impl Into<String>, output: Option<Value>) -> Self {
        Self::new(
            id,
            NodeData::Start(StartData {
                output,
                extra: Map::new(),
            }),
        )
    }

    pub fn condition(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeData::Condition(ConditionData {
                condition_type: ConditionType::Expression,
                expression: expression.into(),
                extra: Map::new(),
            }),
        )
    }

    pub fn job(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeData::Job(JobData {
                language: default_language(),
                code: code.into(),
                extra: Map::new(),
            }),
        )
    }

    pub fn endpoint(id: impl Into<String>) -> Self {
        Self::new(id, NodeData::Endpoint(EndpointData::default()))
    }

    pub fn node_type(&self) -> NodeType {
        self.data.node_type()
    }

    /// Per-node iteration ceiling declared by memory-bearing nodes
    pub fn max_iterations(&self) -> Option<u32> {
        match &self.data {
            NodeData::PersonJob(data) => data.max_iterations,
            NodeData::PersonBatchJob(data) => data.job.max_iterations,
            _ => None,
        }
    }
}

/// Boolean branch tag on arrows leaving a condition node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    True,
    False,
}

impl Branch {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Branch::True
        } else {
            Branch::False
        }
    }

    pub fn matches(&self, value: bool) -> bool {
        *self == Branch::from_bool(value)
    }

    /// Parses the literal strings "true"/"false" (case-insensitive)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Branch::True),
            "false" => Some(Branch::False),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleMode {
    #[default]
    Default,
    /// Input is consumed once, on the node's first execution
    FirstOnly,
}

/// Optional arrow payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrowData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(default, alias = "handleMode")]
    pub handle_mode: HandleMode,
    /// Input name the target sees this value under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Directed connection between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrow {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub data: ArrowData,
}

impl Arrow {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            data: ArrowData::default(),
        }
    }

    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.data.branch = Some(branch);
        self
    }

    pub fn first_only(mut self) -> Self {
        self.data.handle_mode = HandleMode::FirstOnly;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data.label = Some(label.into());
        self
    }

    pub fn branch(&self) -> Option<Branch> {
        self.data.branch
    }

    pub fn is_first_only(&self) -> bool {
        self.data.handle_mode == HandleMode::FirstOnly
    }

    /// Name under which the target receives this arrow's value
    pub fn input_name(&self) -> &str {
        self.data.label.as_deref().unwrap_or(&self.source)
    }
}
