/// Diagram execution REST API endpoints
///
/// Runs posted diagrams through the shared execution engine, returns static
/// execution plans and lists the executors the configured environment exposes.

use crate::{
    config::Config,
    diagram::Diagram,
    executors::{ExecutorFactory, ExecutorRegistry},
    runtime::{planner, ExecutionEngine, ExecutionOptions, ExecutionPlan, ExecutionResult, GraphIndex},
};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration; execution defaults come from here
    pub config: Arc<Config>,
    /// Executors available in the configured environment
    pub registry: Arc<ExecutorRegistry>,
    /// Engine shared by every request
    pub engine: Arc<ExecutionEngine>,
}

/// Request body for plan and execution endpoints
///
/// The diagram is taken as raw JSON so legacy branch encodings get migrated
/// on the way in.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub diagram: Value,
    #[serde(default)]
    pub options: Option<ExecutionOptions>,
}

/// Create diagram execution routes
pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/executors", get(list_executors))
        .route("/api/plan", post(plan_diagram))
        .route("/api/executions", post(execute_diagram))
}

fn parse_diagram(raw: Value) -> Result<Diagram, StatusCode> {
    Diagram::from_value(raw).map_err(|e| {
        tracing::warn!("❌ Rejected diagram payload: {}", e);
        StatusCode::BAD_REQUEST
    })
}

/// List executor node types
///
/// GET /api/executors
async fn list_executors(State(state): State<AppState>) -> Json<Value> {
    let node_types: Vec<&str> = state
        .registry
        .supported_node_types()
        .into_iter()
        .map(|node_type| node_type.as_str())
        .collect();

    Json(json!({
        "environment": state.registry.environment(),
        "node_types": node_types,
    }))
}

/// Build a static execution plan
///
/// POST /api/plan
/// Body: { "diagram": { "nodes": [...], "arrows": [...] } }
async fn plan_diagram(Json(payload): Json<ExecuteRequest>) -> Result<Json<ExecutionPlan>, StatusCode> {
    let diagram = parse_diagram(payload.diagram)?;
    let graph = Arc::new(GraphIndex::build(&diagram));
    tracing::debug!("🗺️ Planning diagram with {} nodes", graph.node_count());
    Ok(Json(planner::plan(graph)))
}

/// Execute a diagram and return its result
///
/// POST /api/executions
/// Body: { "diagram": {...}, "options": { "max_iterations": 10, ... } }
///
/// Failed runs still answer 200: the result's `success` and `errors` fields
/// carry the failure.
async fn execute_diagram(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteRequest>,
) -> Result<Json<ExecutionResult>, StatusCode> {
    let diagram = parse_diagram(payload.diagram)?;
    let options = payload
        .options
        .unwrap_or_else(|| ExecutionOptions::from_config(&state.config.execution));

    tracing::info!("📥 Execution request for diagram with {} nodes", diagram.nodes.len());
    let result = state.engine.execute(&diagram, options).await;

    if result.success {
        tracing::info!("✅ Execution {} completed", result.metadata.execution_id);
    } else {
        tracing::warn!(
            "⚠️ Execution {} ended as {:?} with {} errors",
            result.metadata.execution_id,
            result.status(),
            result.errors.len()
        );
    }
    Ok(Json(result))
}
