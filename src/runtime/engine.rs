/// Diagram execution engine
///
/// Runs a diagram pass by pass: every pass takes the pending nodes as
/// candidates, drops skipped ones, re-queues those whose dependencies aren't
/// met yet, and dispatches the rest concurrently. Results are applied in
/// candidate order after a join barrier, then the successors of every node
/// that ran become the next pending set. Cycles are allowed and bounded by
/// the Loop Controller; the run as a whole is bounded by a pass budget, a
/// wall-clock timeout and an external cancellation token.

use crate::diagram::{Diagram, Node, NodeType};
use crate::executors::{is_truthy, Executor, ExecutorError, ExecutorFactory, ExecutorOutput};
use crate::runtime::context::{ExecutionContext, ExecutionOptions};
use crate::runtime::error::{
    DiagramExecutionError, EngineError, MaxIterationsError, NodeErrorPhase, NodeExecutionError,
    StructuredError,
};
use crate::runtime::events::{StreamSink, StreamUpdate, UpdateType};
use crate::runtime::graph::GraphIndex;
use crate::runtime::loops::LoopController;
use crate::runtime::resolver::DependencyResolver;
use crate::runtime::result::{ExecutionMetadata, ExecutionResult, ExecutionStatus};
use crate::runtime::skip::{SkipManager, SkipReason};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Executes diagrams against an executor factory
pub struct ExecutionEngine {
    factory: Arc<dyn ExecutorFactory>,
    sink: Option<Arc<dyn StreamSink>>,
}

/// Mutable state of one run, owned by the engine for its duration
struct RunState {
    ctx: ExecutionContext,
    resolver: DependencyResolver,
    loops: Option<LoopController>,
    skips: SkipManager,
    options: Arc<ExecutionOptions>,
    started: Instant,
    /// Node failures tolerated in debug mode
    recorded: Vec<StructuredError>,
}

/// Result of dispatching one node
type NodeOutcome = Result<ExecutorOutput, (NodeErrorPhase, String)>;

impl ExecutionEngine {
    pub fn new(factory: Arc<dyn ExecutorFactory>) -> Self {
        Self { factory, sink: None }
    }

    /// Attach a sink receiving lifecycle updates
    pub fn with_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn factory(&self) -> &Arc<dyn ExecutorFactory> {
        &self.factory
    }

    /// Run a diagram to completion; failures are reported inside the result
    pub async fn execute(&self, diagram: &Diagram, options: ExecutionOptions) -> ExecutionResult {
        self.execute_with_cancel(diagram, options, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), aborting once `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        diagram: &Diagram,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let start_time = Utc::now();
        let graph = Arc::new(GraphIndex::build(diagram));

        let mut ctx = ExecutionContext::new(&execution_id, graph.clone());
        ctx.variables = options.variables.clone();

        let mut run = RunState {
            ctx,
            resolver: DependencyResolver::new(graph.clone()),
            loops: None,
            skips: SkipManager::new(),
            options: Arc::new(options),
            started: Instant::now(),
            recorded: Vec::new(),
        };

        if let Some(sink) = &self.sink {
            sink.open(&execution_id);
        }
        self.emit(StreamUpdate::execution(
            UpdateType::ExecutionStarted,
            &execution_id,
            json!({ "node_count": graph.node_count(), "arrow_count": graph.arrows().len() }),
        ));
        tracing::info!(
            "🚀 Starting execution {} ({} nodes, {} arrows)",
            execution_id,
            graph.node_count(),
            graph.arrows().len()
        );

        let outcome = self.drive(&mut run, &cancel).await;

        let status = match &outcome {
            Ok(()) => ExecutionStatus::Completed,
            Err(EngineError::Aborted) => ExecutionStatus::Aborted,
            Err(_) => ExecutionStatus::Failed,
        };

        let mut errors = std::mem::take(&mut run.recorded);
        if let Err(err) = &outcome {
            if let Some(node_id) = err.node_id() {
                run.ctx.errors.insert(node_id.to_string(), err.to_string());
            }
            errors.push(StructuredError::from(err));
        }

        let final_outputs = final_outputs(&run.ctx);
        let elapsed = run.started.elapsed();
        match &outcome {
            Ok(()) => {
                tracing::info!(
                    "🎉 Execution {} completed in {:?}: {} node runs, cost ${:.5}",
                    execution_id,
                    elapsed,
                    run.ctx.execution_order.len(),
                    run.ctx.total_cost
                );
                self.emit(StreamUpdate::execution(
                    UpdateType::ExecutionCompleted,
                    &execution_id,
                    json!({ "execution_order": run.ctx.execution_order, "total_cost": run.ctx.total_cost }),
                ));
            }
            Err(EngineError::Aborted) => {
                tracing::warn!("🛑 Execution {} aborted after {:?}", execution_id, elapsed);
                self.emit(StreamUpdate::execution(UpdateType::ExecutionAborted, &execution_id, Value::Null));
            }
            Err(err) => {
                tracing::error!("❌ Execution {} failed after {:?}: {}", execution_id, elapsed, err);
                self.emit(StreamUpdate::execution(
                    UpdateType::ExecutionFailed,
                    &execution_id,
                    json!({ "error": err.to_string() }),
                ));
            }
        }
        if let Some(sink) = &self.sink {
            sink.close(&execution_id);
        }

        ExecutionResult {
            success: status == ExecutionStatus::Completed && errors.is_empty(),
            metadata: ExecutionMetadata {
                execution_id,
                start_time,
                end_time: Some(Utc::now()),
                status,
                total_cost: run.ctx.total_cost,
                node_count: graph.node_count(),
            },
            context: run.ctx,
            final_outputs,
            errors,
        }
    }

    async fn drive(&self, run: &mut RunState, cancel: &CancellationToken) -> Result<(), EngineError> {
        let graph = run.ctx.graph.clone();

        let start_nodes = run.resolver.validate_start_nodes();
        let cycles = run.resolver.detect_cycles();
        if !cycles.is_empty() {
            run.loops = Some(LoopController::new(run.options.max_iterations, &cycles));
        }

        run.skips.clear();
        let options = Arc::clone(&run.options);
        for node_id in &options.skip_nodes {
            if graph.contains(node_id) {
                run.skips.skip(node_id.clone(), SkipReason::UserRequested);
                self.record_skip(run, node_id);
            } else {
                tracing::warn!("⚠️ Ignoring skip request for unknown node {}", node_id);
            }
        }

        if !run.options.skip_validation {
            self.validate(&graph, &start_nodes)?;
        }

        let unreachable = run.resolver.unreachable_nodes();
        if !unreachable.is_empty() {
            return Err(DiagramExecutionError::Deadlock(unreachable).into());
        }

        let mut pending = run.resolver.initial_nodes();
        let pass_budget = (run.options.max_iterations as usize).saturating_mul(graph.node_count().max(1));
        let mut passes = 0usize;

        while !pending.is_empty() {
            if cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }
            if run.started.elapsed() >= run.options.timeout {
                return Err(DiagramExecutionError::Timeout(run.options.timeout).into());
            }
            if passes >= pass_budget {
                // A cyclic node at its limit names the loop that ran away
                if let Some(loops) = &run.loops {
                    for node_id in &pending {
                        loops.check(node_id, run.ctx.execution_count(node_id))?;
                    }
                }
                return Err(MaxIterationsError::PassBudget {
                    limit: pass_budget,
                    pending,
                }
                .into());
            }
            passes += 1;

            let candidates = std::mem::take(&mut pending);
            tracing::debug!("🔄 Pass {}: candidates {:?}", passes, candidates);

            let skipped_ids: HashSet<String> = run.skips.skipped().keys().cloned().collect();
            let mut requeue = Vec::new();
            let mut ready: Vec<Node> = Vec::new();
            let mut skipped_this_pass = 0usize;

            for node_id in &candidates {
                let Some(node) = graph.node(node_id) else {
                    continue;
                };

                if run.skips.is_skipped(node_id) {
                    self.record_skip(run, node_id);
                    skipped_this_pass += 1;
                    continue;
                }

                if let Some(ceiling) = node.max_iterations() {
                    if run.ctx.execution_count(node_id) >= ceiling {
                        run.skips.skip(node_id.clone(), SkipReason::MaxIterationsReached);
                        self.record_skip(run, node_id);
                        skipped_this_pass += 1;
                        continue;
                    }
                }

                let check = run.resolver.check_dependencies_with_skips(
                    node_id,
                    &run.ctx.executed_nodes,
                    &run.ctx.condition_values,
                    &run.ctx.first_only_consumed,
                    &skipped_ids,
                );
                if !check.met {
                    requeue.push(node_id.clone());
                    continue;
                }

                if let Some(loops) = &run.loops {
                    loops.check(node_id, run.ctx.execution_count(node_id))?;
                }

                ready.push(node.clone());
            }

            let executed_this_pass = if ready.is_empty() {
                Vec::new()
            } else {
                let outcomes = self.dispatch(run, &ready, cancel).await?;
                self.apply(run, ready, outcomes)?
            };

            for node_id in &executed_this_pass {
                for next in run.resolver.get_next_nodes(node_id, &run.ctx.condition_values) {
                    if run.skips.is_skipped(&next) {
                        continue;
                    }
                    let cyclic = run.loops.as_ref().is_some_and(|loops| loops.is_cyclic(&next));
                    if run.ctx.executed_nodes.contains(&next) && !cyclic {
                        continue;
                    }
                    if !requeue.contains(&next) {
                        requeue.push(next);
                    }
                }
            }
            pending = requeue;

            if executed_this_pass.is_empty() && skipped_this_pass == 0 && pending == candidates {
                return Err(DiagramExecutionError::Deadlock(pending).into());
            }
        }

        Ok(())
    }

    /// Structural checks run before any node executes
    fn validate(&self, graph: &GraphIndex, start_nodes: &[String]) -> Result<(), DiagramExecutionError> {
        if start_nodes.is_empty() {
            return Err(DiagramExecutionError::NoStartNodes);
        }

        let mut unsupported: BTreeMap<NodeType, Vec<String>> = BTreeMap::new();
        for node in graph.nodes() {
            if !self.factory.can_execute(node.node_type()) {
                unsupported.entry(node.node_type()).or_default().push(node.id.clone());
            }
        }

        match unsupported.into_iter().next() {
            None => Ok(()),
            Some((node_type, node_ids)) => {
                let reason = match self.factory.create_executor(node_type) {
                    Err(err) => err.to_string(),
                    Ok(_) => "executor unavailable".to_string(),
                };
                Err(DiagramExecutionError::UnsupportedNodeType {
                    node_type,
                    reason,
                    node_ids,
                })
            }
        }
    }

    /// Run all ready nodes concurrently against one context snapshot
    async fn dispatch(
        &self,
        run: &RunState,
        ready: &[Node],
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeOutcome>, EngineError> {
        let snapshot = Arc::new(run.ctx.clone());
        let semaphore = Arc::new(Semaphore::new(run.options.max_concurrency.max(1)));
        let mut tasks: JoinSet<(usize, NodeOutcome)> = JoinSet::new();
        let mut slots = HashMap::new();

        for (slot, node) in ready.iter().enumerate() {
            tracing::info!("📍 Executing node '{}' (type: {})", node.id, node.node_type());
            self.emit(StreamUpdate::node(
                UpdateType::NodeStarted,
                &run.ctx.execution_id,
                &node.id,
                json!({ "node_type": node.node_type() }),
            ));

            let executor = self.factory.create_executor(node.node_type());
            let node = node.clone();
            let snapshot = Arc::clone(&snapshot);
            let options = Arc::clone(&run.options);
            let semaphore = Arc::clone(&semaphore);

            let handle = tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (slot, Err((NodeErrorPhase::Execution, "Dispatch semaphore closed".to_string())));
                };
                (slot, run_node(executor, &node, &snapshot, &options).await)
            });
            slots.insert(handle.id(), slot);
        }

        let remaining = run.options.timeout.saturating_sub(run.started.elapsed());
        let mut outcomes: Vec<Option<NodeOutcome>> = (0..ready.len()).map(|_| None).collect();

        let joined = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Aborted),
            joined = tokio::time::timeout(remaining, async {
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
                        Err(join_error) => {
                            if let Some(slot) = slots.get(&join_error.id()) {
                                outcomes[*slot] = Some(Err((
                                    NodeErrorPhase::Execution,
                                    format!("Executor task failed: {}", join_error),
                                )));
                            }
                        }
                    }
                }
            }) => joined.map_err(|_| EngineError::from(DiagramExecutionError::Timeout(run.options.timeout))),
        };

        if let Err(err) = joined {
            tasks.abort_all();
            return Err(err);
        }

        Ok(outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| Err((NodeErrorPhase::Execution, "Executor task vanished".to_string())))
            })
            .collect())
    }

    /// Fold dispatch outcomes into the context in candidate order
    ///
    /// Returns the nodes that count as executed this pass. Outside debug mode
    /// the first failure fails the run once every outcome has been applied.
    fn apply(
        &self,
        run: &mut RunState,
        ready: Vec<Node>,
        outcomes: Vec<NodeOutcome>,
    ) -> Result<Vec<String>, EngineError> {
        let mut executed = Vec::with_capacity(ready.len());
        let mut first_failure: Option<NodeExecutionError> = None;

        for (node, outcome) in ready.into_iter().zip(outcomes) {
            match outcome {
                Ok(result) => {
                    let ctx = &mut run.ctx;
                    if node.node_type() == NodeType::Condition {
                        ctx.condition_values.insert(node.id.clone(), is_truthy(&result.output));
                    }
                    if ctx.graph.incoming(&node.id).iter().any(|arrow| arrow.is_first_only()) {
                        ctx.first_only_consumed.insert(node.id.clone());
                    }
                    ctx.total_cost += result.cost;
                    ctx.execution_order.push(node.id.clone());
                    *ctx.node_execution_counts.entry(node.id.clone()).or_insert(0) += 1;
                    ctx.executed_nodes.insert(node.id.clone());

                    tracing::info!("✅ Node '{}' completed", node.id);
                    self.emit(StreamUpdate::node(
                        UpdateType::NodeCompleted,
                        &ctx.execution_id,
                        &node.id,
                        json!({ "output": result.output, "cost": result.cost, "metadata": result.metadata }),
                    ));
                    ctx.node_outputs.insert(node.id.clone(), result.output);
                    executed.push(node.id);
                }
                Err((phase, message)) => {
                    let error = NodeExecutionError {
                        node_id: node.id.clone(),
                        node_type: node.node_type(),
                        phase,
                        message,
                    };
                    tracing::error!("❌ {}", error);
                    run.ctx.errors.insert(node.id.clone(), error.to_string());
                    self.emit(StreamUpdate::node(
                        UpdateType::NodeFailed,
                        &run.ctx.execution_id,
                        &node.id,
                        json!({ "error": error.to_string(), "phase": phase }),
                    ));

                    if run.options.debug_mode {
                        *run.ctx.node_execution_counts.entry(node.id.clone()).or_insert(0) += 1;
                        run.ctx.executed_nodes.insert(node.id.clone());
                        run.recorded.push(StructuredError::from(&EngineError::from(error)));
                        executed.push(node.id);
                    } else if first_failure.is_none() {
                        first_failure = Some(error);
                    }
                }
            }
        }

        match first_failure {
            Some(error) => Err(error.into()),
            None => Ok(executed),
        }
    }

    fn record_skip(&self, run: &mut RunState, node_id: &str) {
        let Some(reason) = run.skips.skip_reason(node_id).cloned() else {
            return;
        };
        if run.ctx.skipped_nodes.contains_key(node_id) {
            return;
        }
        tracing::info!("⏭️ Node '{}' skipped ({})", node_id, reason);
        self.emit(StreamUpdate::node(
            UpdateType::NodeSkipped,
            &run.ctx.execution_id,
            node_id,
            json!({ "reason": reason }),
        ));
        run.ctx.skipped_nodes.insert(node_id.to_string(), reason);
    }

    fn emit(&self, update: StreamUpdate) {
        if let Some(sink) = &self.sink {
            if sink.is_enabled() {
                sink.emit(update);
            }
        }
    }
}

/// Validate then execute one node; never touches shared state
async fn run_node(
    executor: Result<Arc<dyn Executor>, ExecutorError>,
    node: &Node,
    ctx: &ExecutionContext,
    options: &ExecutionOptions,
) -> NodeOutcome {
    let executor = executor.map_err(|e| (NodeErrorPhase::Validation, e.to_string()))?;

    let validation = executor.validate_inputs(node, ctx);
    for warning in &validation.warnings {
        tracing::warn!("⚠️ Node '{}': {}", node.id, warning);
    }
    if !validation.is_valid {
        return Err((NodeErrorPhase::Validation, validation.errors.join("; ")));
    }

    let started = Instant::now();
    let result = executor.execute(node, ctx, options).await;
    tracing::debug!("⏱️ Node '{}' ran for {:?}", node.id, started.elapsed());

    result.map_err(|e| match e {
        ExecutorError::Validation(errors) => (NodeErrorPhase::Validation, errors.join("; ")),
        other => (NodeErrorPhase::Execution, other.to_string()),
    })
}

/// Outputs of executed leaf nodes and endpoints, keyed by node id
fn final_outputs(ctx: &ExecutionContext) -> Map<String, Value> {
    ctx.graph
        .nodes()
        .filter(|node| {
            node.node_type() == NodeType::Endpoint || ctx.graph.outgoing(&node.id).is_empty()
        })
        .filter_map(|node| {
            ctx.node_outputs
                .get(&node.id)
                .map(|output| (node.id.clone(), output.clone()))
        })
        .collect()
}
