/// Execution Planner
///
/// Static, diagnostic view of how a diagram would run: start nodes, cycles,
/// dependency map, a topological order grouped into parallel levels, and
/// rough cost and time estimates. Nothing here influences the engine.

use crate::diagram::NodeType;
use crate::runtime::graph::GraphIndex;
use crate::runtime::resolver::DependencyResolver;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub start_nodes: Vec<String>,
    pub has_cycles: bool,
    pub cycles: Vec<Vec<String>>,
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub execution_order: Vec<String>,
    /// Levels of nodes whose dependencies are all in earlier levels
    pub parallel_groups: Vec<Vec<String>>,
    pub node_types: BTreeMap<String, usize>,
    pub total_nodes: usize,
    pub total_arrows: usize,
    pub estimated_cost: f64,
    pub estimated_time_secs: f64,
}

pub fn plan(graph: Arc<GraphIndex>) -> ExecutionPlan {
    let resolver = DependencyResolver::new(graph.clone());

    let start_nodes = resolver.validate_start_nodes();
    let cycles = resolver.detect_cycles();
    let execution_order = resolver.topological_sort();
    let dependencies: BTreeMap<String, Vec<String>> = graph
        .node_ids()
        .iter()
        .map(|id| (id.clone(), resolver.dependencies(id)))
        .collect();
    let parallel_groups = parallel_groups(&execution_order, &dependencies);

    let mut node_types = BTreeMap::new();
    for node in graph.nodes() {
        *node_types.entry(node.node_type().to_string()).or_insert(0) += 1;
    }

    let estimated_cost = graph.nodes().map(|node| estimated_node_cost(node.node_type())).sum();
    let estimated_time_secs = parallel_groups
        .iter()
        .map(|group| {
            group
                .iter()
                .filter_map(|id| graph.node(id))
                .map(|node| estimated_node_time(node.node_type()))
                .fold(0.0, f64::max)
        })
        .sum();

    tracing::debug!(
        "🗺️ Planned {} nodes in {} parallel groups ({} cycles)",
        graph.node_count(),
        parallel_groups.len(),
        cycles.len()
    );

    ExecutionPlan {
        start_nodes,
        has_cycles: !cycles.is_empty(),
        cycles,
        dependencies,
        execution_order,
        parallel_groups,
        node_types,
        total_nodes: graph.node_count(),
        total_arrows: graph.arrows().len(),
        estimated_cost,
        estimated_time_secs,
    }
}

/// Level assignment over the topological order
///
/// When a cycle leaves no node with all dependencies placed, the earliest
/// remaining node in topological order opens the next level on its own.
fn parallel_groups(
    order: &[String],
    dependencies: &BTreeMap<String, Vec<String>>,
) -> Vec<Vec<String>> {
    let mut assigned: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&String> = order.iter().collect();
    let mut groups = Vec::new();

    while !remaining.is_empty() {
        let mut level: Vec<String> = remaining
            .iter()
            .filter(|id| {
                dependencies
                    .get(id.as_str())
                    .map_or(true, |deps| deps.iter().all(|dep| assigned.contains(dep.as_str())))
            })
            .map(|id| id.to_string())
            .collect();

        if level.is_empty() {
            level.push(remaining[0].clone());
        }

        for id in &level {
            if let Some(found) = remaining.iter().position(|candidate| *candidate == id) {
                assigned.insert(remaining.remove(found).as_str());
            }
        }
        groups.push(level);
    }

    groups
}

fn estimated_node_cost(node_type: NodeType) -> f64 {
    match node_type {
        NodeType::PersonJob | NodeType::PersonBatchJob => 0.01,
        NodeType::Db => 0.001,
        _ => 0.0,
    }
}

fn estimated_node_time(node_type: NodeType) -> f64 {
    match node_type {
        NodeType::PersonJob | NodeType::PersonBatchJob => 3.0,
        NodeType::Db => 0.5,
        NodeType::Endpoint => 1.0,
        _ => 0.1,
    }
}
