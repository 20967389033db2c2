//! Integration tests for diagram execution.
//!
//! Covers branching, bounded loops, first-only inputs, skips, deadlocks and
//! the run-level failure modes (abort, timeout, debug mode, sandboxing).

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use diagrun::diagram::{Arrow, Branch, ConditionType, Diagram, Node, NodeData};
use diagrun::executors::ExecutorRegistry;
use diagrun::runtime::{
    BroadcastSink, ErrorKind, ExecutionEngine, ExecutionOptions, ExecutionStatus, GraphIndex,
    SkipReason, UpdateType,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{person, person_with_ceiling, slow_db, test_registry};

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(test_registry())
}

fn order(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// S -> C -> (true) E1 / (false) E2
fn branch_diagram(x: i64) -> Diagram {
    Diagram {
        nodes: vec![
            Node::start("S", Some(json!({ "x": x }))),
            Node::condition("C", "x > 5"),
            Node::endpoint("E1"),
            Node::endpoint("E2"),
        ],
        arrows: vec![
            Arrow::new("s-c", "S", "C"),
            Arrow::new("c-e1", "C", "E1").with_branch(Branch::True),
            Arrow::new("c-e2", "C", "E2").with_branch(Branch::False),
        ],
    }
}

/// S -(first only)-> A -> B -> C -> A
fn cycle_diagram(a: Node) -> Diagram {
    Diagram {
        nodes: vec![Node::start("S", None), a, person("B"), person("C")],
        arrows: vec![
            Arrow::new("s-a", "S", "A").first_only(),
            Arrow::new("a-b", "A", "B"),
            Arrow::new("b-c", "B", "C"),
            Arrow::new("c-a", "C", "A"),
        ],
    }
}

#[tokio::test]
async fn only_the_taken_branch_runs() {
    let result = engine().execute(&branch_diagram(10), ExecutionOptions::default()).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.status(), ExecutionStatus::Completed);
    assert_eq!(result.execution_order(), order(&["S", "C", "E1"]).as_slice());
    assert_eq!(result.context.condition_values.get("C"), Some(&true));
    assert!(!result.context.executed_nodes.contains("E2"));
    assert_eq!(result.final_outputs.len(), 1);
    assert_eq!(result.final_outputs.get("E1"), Some(&json!(true)));

    let result = engine().execute(&branch_diagram(1), ExecutionOptions::default()).await;
    assert_eq!(result.execution_order(), order(&["S", "C", "E2"]).as_slice());
    assert_eq!(result.final_outputs.get("E2"), Some(&json!(false)));
}

#[tokio::test]
async fn diagram_without_start_nodes_fails_before_running_anything() {
    let diagram = Diagram {
        nodes: vec![Node::job("J", "return 1"), Node::endpoint("E")],
        arrows: vec![Arrow::new("j-e", "J", "E")],
    };
    let result = engine().execute(&diagram, ExecutionOptions::default()).await;

    assert!(!result.success);
    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert!(result.execution_order().is_empty());
    assert!(result.final_outputs.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::Diagram);
}

#[tokio::test]
async fn cycles_stop_at_the_loop_limit() {
    let options = ExecutionOptions {
        max_iterations: 3,
        ..ExecutionOptions::default()
    };
    let result = engine().execute(&cycle_diagram(person("A")), options).await;

    assert!(!result.success);
    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_eq!(result.errors[0].kind, ErrorKind::MaxIterations);
    assert_eq!(result.errors[0].node_id.as_deref(), Some("A"));
    assert_eq!(result.context.execution_count("A"), 3);
    assert_eq!(result.context.execution_count("C"), 3);
    assert!(result.context.errors.contains_key("A"));
    // Three rounds of A -> B -> C at 0.5 each
    assert!((result.context.total_cost - 4.5).abs() < 1e-9);
}

#[tokio::test]
async fn node_ceiling_skips_instead_of_failing() {
    let options = ExecutionOptions {
        max_iterations: 10,
        ..ExecutionOptions::default()
    };
    let result = engine().execute(&cycle_diagram(person_with_ceiling("A", 2)), options).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        result.execution_order(),
        order(&["S", "A", "B", "C", "A", "B", "C"]).as_slice()
    );
    assert_eq!(
        result.context.skipped_nodes.get("A"),
        Some(&SkipReason::MaxIterationsReached)
    );
    // First round used the first-only input, the second saw its own count
    assert_eq!(result.output("A"), Some(&json!("A#1")));
}

#[tokio::test]
async fn detect_max_iterations_condition_exits_the_loop() {
    let mut exit = Node::condition("C", "");
    if let NodeData::Condition(data) = &mut exit.data {
        data.condition_type = ConditionType::DetectMaxIterations;
    }
    let diagram = Diagram {
        nodes: vec![
            Node::start("S", None),
            person_with_ceiling("A", 2),
            exit,
            Node::endpoint("E"),
        ],
        arrows: vec![
            Arrow::new("s-a", "S", "A").first_only(),
            Arrow::new("a-c", "A", "C"),
            Arrow::new("c-a", "C", "A").with_branch(Branch::False),
            Arrow::new("c-e", "C", "E").with_branch(Branch::True),
        ],
    };
    let result = engine().execute(&diagram, ExecutionOptions::default()).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        result.execution_order(),
        order(&["S", "A", "C", "A", "C", "E"]).as_slice()
    );
    assert_eq!(result.final_outputs.get("E"), Some(&json!(true)));
}

#[tokio::test]
async fn first_only_input_starts_memory_nodes_early() {
    // A also waits on K, which only finishes two passes later
    let diagram = Diagram {
        nodes: vec![
            Node::start("S", None),
            person("A"),
            Node::job("J", "return 1"),
            Node::job("K", "return 2"),
        ],
        arrows: vec![
            Arrow::new("s-a", "S", "A").first_only(),
            Arrow::new("s-j", "S", "J"),
            Arrow::new("j-k", "J", "K"),
            Arrow::new("k-a", "K", "A"),
        ],
    };
    let result = engine().execute(&diagram, ExecutionOptions::default()).await;

    assert!(result.success, "errors: {:?}", result.errors);
    let position = |id: &str| result.execution_order().iter().position(|n| n == id);
    assert!(position("A") < position("K"));
    assert_eq!(result.context.execution_count("A"), 1);
    assert!(result.context.is_first_only_consumed("A"));
}

#[tokio::test]
async fn unreachable_dependencies_deadlock() {
    // M needs X, which sits behind the branch C never takes
    let diagram = Diagram {
        nodes: vec![
            Node::start("S", None),
            Node::condition("C", "false"),
            Node::job("X", "return 'x'"),
            Node::endpoint("M"),
        ],
        arrows: vec![
            Arrow::new("s-c", "S", "C"),
            Arrow::new("s-m", "S", "M"),
            Arrow::new("c-x", "C", "X").with_branch(Branch::True),
            Arrow::new("x-m", "X", "M"),
        ],
    };
    let result = engine().execute(&diagram, ExecutionOptions::default()).await;

    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_eq!(result.errors[0].kind, ErrorKind::Diagram);
    assert!(result.errors[0].message.contains("deadlocked"));
    assert!(result.errors[0].message.contains('M'));
    assert_eq!(result.execution_order(), order(&["S", "C"]).as_slice());
}

#[tokio::test]
async fn mutual_dependency_deadlocks() {
    // X and Y wait on each other and S feeds neither
    let pair = vec![Arrow::new("x-y", "X", "Y"), Arrow::new("y-x", "Y", "X")];
    let diagram = Diagram {
        nodes: vec![Node::start("S", None), Node::job("X", "return 1"), Node::job("Y", "return 2")],
        arrows: pair.clone(),
    };
    let result = engine().execute(&diagram, ExecutionOptions::default()).await;

    assert!(!result.success);
    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_eq!(result.errors[0].kind, ErrorKind::Diagram);
    assert!(result.errors[0].message.contains("deadlocked"));
    assert!(result.errors[0].message.contains("X, Y"));
    assert!(result.execution_order().is_empty());

    // Without any start node, even when structural validation is skipped
    let diagram = Diagram {
        nodes: vec![Node::job("X", "return 1"), Node::job("Y", "return 2")],
        arrows: pair,
    };
    let options = ExecutionOptions {
        skip_validation: true,
        ..ExecutionOptions::default()
    };
    let result = engine().execute(&diagram, options).await;

    assert!(!result.success);
    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert!(result.errors[0].message.contains("deadlocked"));
    assert!(result.execution_order().is_empty());
    assert!(result.final_outputs.is_empty());
}

#[tokio::test]
async fn start_nodes_with_incoming_arrows_fail_validation() {
    let diagram = Diagram {
        nodes: vec![Node::start("S", None), Node::job("J", "return 1")],
        arrows: vec![Arrow::new("s-j", "S", "J"), Arrow::new("j-s", "J", "S")],
    };
    let options = ExecutionOptions {
        max_iterations: 5,
        ..ExecutionOptions::default()
    };
    let result = engine().execute(&diagram, options).await;

    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_eq!(result.errors[0].kind, ErrorKind::Node);
    assert_eq!(result.errors[0].node_id.as_deref(), Some("S"));
    assert!(result.errors[0].message.contains("incoming arrows"));
    assert!(result.execution_order().is_empty());
}

#[tokio::test]
async fn loop_limit_is_reported_before_the_pass_budget() {
    // Every node is cyclic, so the budget runs out in the pass where S hits its limit
    let registry = ExecutorRegistry::empty(diagrun::config::ExecutionEnvironment::Server);
    registry.register(Arc::new(common::LoopingStartExecutor));
    registry.register(Arc::new(diagrun::executors::job::JobExecutor));
    let engine = ExecutionEngine::new(Arc::new(registry));

    let diagram = Diagram {
        nodes: vec![Node::start("S", None), Node::job("J", "return 1")],
        arrows: vec![Arrow::new("s-j", "S", "J"), Arrow::new("j-s", "J", "S")],
    };
    let options = ExecutionOptions {
        max_iterations: 5,
        ..ExecutionOptions::default()
    };
    let result = engine.execute(&diagram, options).await;

    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_eq!(result.errors[0].kind, ErrorKind::MaxIterations);
    assert_eq!(result.errors[0].node_id.as_deref(), Some("S"));
    assert_eq!(result.context.execution_count("S"), 5);
    assert_eq!(result.context.execution_count("J"), 5);
}

#[tokio::test]
async fn skipped_nodes_do_not_run_and_block_their_targets() {
    let diagram = Diagram {
        nodes: vec![
            Node::start("S", None),
            Node::job("J", "return 1"),
            Node::endpoint("E"),
        ],
        arrows: vec![Arrow::new("s-j", "S", "J"), Arrow::new("j-e", "J", "E")],
    };
    let options = ExecutionOptions {
        skip_nodes: vec!["J".into(), "ghost".into()],
        ..ExecutionOptions::default()
    };
    let result = engine().execute(&diagram, options.clone()).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.execution_order(), order(&["S"]).as_slice());
    assert_eq!(result.context.skipped_nodes.get("J"), Some(&SkipReason::UserRequested));
    assert!(!result.context.skipped_nodes.contains_key("ghost"));
    assert!(result.final_outputs.is_empty());

    // E also reachable from S: it waits on the skipped J forever
    let mut diagram = diagram;
    diagram.arrows.push(Arrow::new("s-e", "S", "E"));
    let result = engine().execute(&diagram, options).await;
    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert!(result.errors[0].message.contains("deadlocked"));
}

#[tokio::test]
async fn cancelled_runs_end_as_aborted() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine()
        .execute_with_cancel(&branch_diagram(10), ExecutionOptions::default(), cancel)
        .await;

    assert_eq!(result.status(), ExecutionStatus::Aborted);
    assert!(!result.success);
    assert!(result.execution_order().is_empty());
    assert_eq!(result.errors[0].kind, ErrorKind::Aborted);
}

#[tokio::test]
async fn cancellation_interrupts_running_nodes() {
    let diagram = Diagram {
        nodes: vec![Node::start("S", None), slow_db("D")],
        arrows: vec![Arrow::new("s-d", "S", "D")],
    };
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = engine()
        .execute_with_cancel(&diagram, ExecutionOptions::default(), cancel)
        .await;

    assert_eq!(result.status(), ExecutionStatus::Aborted);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.execution_order(), order(&["S"]).as_slice());
}

#[tokio::test]
async fn slow_runs_time_out() {
    let diagram = Diagram {
        nodes: vec![Node::start("S", None), slow_db("D")],
        arrows: vec![Arrow::new("s-d", "S", "D")],
    };
    let options = ExecutionOptions {
        timeout: Duration::from_millis(200),
        ..ExecutionOptions::default()
    };

    let started = Instant::now();
    let result = engine().execute(&diagram, options).await;

    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_eq!(result.errors[0].kind, ErrorKind::Diagram);
    assert!(result.errors[0].message.contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn debug_mode_records_failures_and_continues() {
    let diagram = Diagram {
        nodes: vec![
            Node::start("S", None),
            Node::job("J", "error('boom')"),
            Node::endpoint("E"),
        ],
        arrows: vec![Arrow::new("s-j", "S", "J"), Arrow::new("j-e", "J", "E")],
    };

    let strict = engine().execute(&diagram, ExecutionOptions::default()).await;
    assert_eq!(strict.status(), ExecutionStatus::Failed);
    assert_eq!(strict.execution_order(), order(&["S"]).as_slice());
    assert_eq!(strict.errors[0].kind, ErrorKind::Node);
    assert!(strict.context.errors.contains_key("J"));

    let options = ExecutionOptions {
        debug_mode: true,
        ..ExecutionOptions::default()
    };
    let debug = engine().execute(&diagram, options).await;
    assert_eq!(debug.status(), ExecutionStatus::Completed);
    assert!(!debug.success);
    assert_eq!(debug.execution_order(), order(&["S", "E"]).as_slice());
    assert_eq!(debug.errors.len(), 1);
    assert_eq!(debug.errors[0].node_id.as_deref(), Some("J"));
    assert!(debug.context.executed_nodes.contains("J"));
    assert_eq!(debug.final_outputs.get("E"), Some(&json!(null)));
}

#[tokio::test]
async fn sandbox_refuses_privileged_nodes_up_front() {
    let diagram = Diagram {
        nodes: vec![Node::start("S", None), person("P")],
        arrows: vec![Arrow::new("s-p", "S", "P")],
    };
    let engine = ExecutionEngine::new(Arc::new(ExecutorRegistry::sandbox()));
    let result = engine.execute(&diagram, ExecutionOptions::default()).await;

    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert!(result.execution_order().is_empty());
    assert_eq!(result.errors[0].kind, ErrorKind::Diagram);
    assert!(result.errors[0].message.contains("person_job"));
    assert!(result.errors[0].message.contains('P'));
}

#[tokio::test]
async fn independent_nodes_run_concurrently() {
    let registry = ExecutorRegistry::empty(diagrun::config::ExecutionEnvironment::Server);
    registry.register(Arc::new(diagrun::executors::start::StartExecutor));
    registry.register(Arc::new(common::SlowDbExecutor(Duration::from_millis(500))));
    let engine = ExecutionEngine::new(Arc::new(registry));

    let diagram = Diagram {
        nodes: vec![Node::start("S", None), slow_db("D1"), slow_db("D2")],
        arrows: vec![Arrow::new("s-d1", "S", "D1"), Arrow::new("s-d2", "S", "D2")],
    };

    let started = Instant::now();
    let result = engine.execute(&diagram, ExecutionOptions::default()).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(started.elapsed() < Duration::from_millis(900));
    // Applied in candidate order regardless of which finished first
    assert_eq!(result.execution_order(), order(&["S", "D1", "D2"]).as_slice());
}

#[tokio::test]
async fn sink_receives_lifecycle_updates() {
    let sink = Arc::new(BroadcastSink::new(64));
    let mut updates = sink.subscribe();
    let engine = engine().with_sink(sink.clone());

    let result = engine.execute(&branch_diagram(10), ExecutionOptions::default()).await;
    assert!(result.success);

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        assert_eq!(update.execution_id, result.metadata.execution_id);
        seen.push((update.update_type, update.node_id));
    }

    assert_eq!(seen.first(), Some(&(UpdateType::ExecutionStarted, None)));
    assert_eq!(seen.last(), Some(&(UpdateType::ExecutionCompleted, None)));
    let completed: Vec<_> = seen
        .iter()
        .filter(|(kind, _)| *kind == UpdateType::NodeCompleted)
        .filter_map(|(_, node_id)| node_id.clone())
        .collect();
    assert_eq!(completed, order(&["S", "C", "E1"]));
}

#[test]
fn graph_index_is_rebuilt_identically() {
    let diagram = branch_diagram(3);
    assert_eq!(GraphIndex::build(&diagram), GraphIndex::build(&diagram));
}

#[test]
fn legacy_branch_encodings_are_migrated_on_import() {
    let diagram = Diagram::from_json_str(
        r#"{
            "nodes": [
                { "id": "S", "type": "start", "data": {} },
                { "id": "C", "type": "condition", "data": { "expression": "x > 5" } },
                { "id": "E1", "type": "endpoint", "data": {} },
                { "id": "E2", "type": "endpoint", "data": {} }
            ],
            "arrows": [
                { "id": "a1", "source": "S", "target": "C" },
                { "id": "a2", "source": "C", "target": "E1", "data": { "label": "true" } },
                { "id": "a3", "source": "C", "target": "E2", "sourceHandle": "C-output-false" }
            ]
        }"#,
    )
    .unwrap();

    assert_eq!(diagram.arrows[0].branch(), None);
    assert_eq!(diagram.arrows[1].branch(), Some(Branch::True));
    assert_eq!(diagram.arrows[2].branch(), Some(Branch::False));
}
