/// Diagram Layer
///
/// Node, arrow and per-kind node data definitions plus the one-time import
/// normalization applied when diagrams are loaded from JSON.

// Core diagram type definitions
pub mod types;

// JSON loading and legacy-encoding migration
pub mod import;

pub use types::{
    Arrow, ArrowData, Branch, ConditionData, ConditionType, DbData, DbSubType, Diagram,
    EndpointData, FileFormat, HandleMode, JobData, Node, NodeData, NodeType, NotionData,
    NotionOperation, PersonBatchJobData, PersonConfig, PersonJobData, StartData,
    UserResponseData,
};
