/// Dependency Resolver
///
/// Decides when a node's inputs are satisfied, which nodes follow a completed
/// node, and where the diagram loops. Everything here is a pure function of
/// the Graph Index plus the run-state slices passed in; the resolver holds no
/// state of its own.

use crate::diagram::{Arrow, NodeType};
use crate::runtime::graph::GraphIndex;
use petgraph::visit::{Dfs, DfsPostOrder, VisitMap};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Why an incoming arrow does not (yet) satisfy its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmetReason {
    SourceNodeNotFound,
    FirstOnlyNoData,
    MissingData,
    ConditionNotEvaluated,
    WrongBranch,
    SourceSkipped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DependencyCheck {
    pub met: bool,
    pub satisfied_arrows: Vec<String>,
    pub unmet: Vec<(String, UnmetReason)>,
}

impl DependencyCheck {
    fn satisfied() -> Self {
        Self {
            met: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependencyResolver {
    graph: Arc<GraphIndex>,
}

impl DependencyResolver {
    pub fn new(graph: Arc<GraphIndex>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &GraphIndex {
        &self.graph
    }

    /// Ids of all start-type nodes, in diagram order
    pub fn validate_start_nodes(&self) -> Vec<String> {
        let starts: Vec<String> = self
            .graph
            .nodes()
            .filter(|node| node.node_type() == NodeType::Start)
            .map(|node| node.id.clone())
            .collect();
        if starts.is_empty() {
            tracing::warn!("⚠️ Diagram has no start nodes");
        }
        starts
    }

    /// Nodes a run begins with: start-type nodes plus nodes nothing points at
    pub fn initial_nodes(&self) -> Vec<String> {
        self.graph
            .nodes()
            .filter(|node| {
                node.node_type() == NodeType::Start || self.graph.incoming(&node.id).is_empty()
            })
            .map(|node| node.id.clone())
            .collect()
    }

    /// Nodes no walk along outgoing arrows from the initial nodes can reach
    ///
    /// Every such node has an incoming arrow, so each one sits on or behind a
    /// cycle that nothing outside it feeds.
    pub fn unreachable_nodes(&self) -> Vec<String> {
        let (graph, indices) = self.graph.to_digraph();
        let mut dfs = Dfs::empty(&graph);
        for id in self.initial_nodes() {
            dfs.move_to(indices[&id]);
            while dfs.next(&graph).is_some() {}
        }

        self.graph
            .node_ids()
            .iter()
            .filter(|id| !dfs.discovered.is_visited(&indices[*id]))
            .cloned()
            .collect()
    }

    pub fn check_dependencies_met(
        &self,
        node_id: &str,
        executed: &HashSet<String>,
        condition_values: &HashMap<String, bool>,
        first_only_consumed: &HashSet<String>,
    ) -> DependencyCheck {
        self.check_dependencies_with_skips(
            node_id,
            executed,
            condition_values,
            first_only_consumed,
            &HashSet::new(),
        )
    }

    /// Same as [`check_dependencies_met`](Self::check_dependencies_met), with
    /// arrows leaving skipped, never-executed nodes treated as unsatisfiable
    pub fn check_dependencies_with_skips(
        &self,
        node_id: &str,
        executed: &HashSet<String>,
        condition_values: &HashMap<String, bool>,
        first_only_consumed: &HashSet<String>,
        skipped: &HashSet<String>,
    ) -> DependencyCheck {
        let Some(node) = self.graph.node(node_id) else {
            return DependencyCheck::default();
        };
        let incoming = self.graph.incoming(node_id);
        if node.node_type() == NodeType::Start || incoming.is_empty() {
            return DependencyCheck::satisfied();
        }

        let mut check = DependencyCheck::default();
        let mut regular_total = 0usize;
        let mut regular_ok = 0usize;
        let mut first_only_ok = false;

        for arrow in incoming {
            let status = self.arrow_status(arrow, node_id, executed, condition_values, skipped);
            if arrow.is_first_only() {
                first_only_ok |= status.is_ok();
            } else {
                regular_total += 1;
                if status.is_ok() {
                    regular_ok += 1;
                }
            }
            match status {
                Ok(()) => check.satisfied_arrows.push(arrow.id.clone()),
                Err(reason) => check.unmet.push((arrow.id.clone(), reason)),
            }
        }

        let consumed = first_only_consumed.contains(node_id);
        check.met = if node.node_type().is_memory_bearing() && !consumed && first_only_ok {
            true
        } else if regular_total == 0 {
            consumed || first_only_ok
        } else {
            regular_ok == regular_total
        };

        tracing::debug!(
            "🔎 Dependencies of {}: met={} satisfied={} unmet={:?}",
            node_id,
            check.met,
            check.satisfied_arrows.len(),
            check.unmet
        );
        check
    }

    fn arrow_status(
        &self,
        arrow: &Arrow,
        node_id: &str,
        executed: &HashSet<String>,
        condition_values: &HashMap<String, bool>,
        skipped: &HashSet<String>,
    ) -> Result<(), UnmetReason> {
        let source = self
            .graph
            .node(&arrow.source)
            .ok_or(UnmetReason::SourceNodeNotFound)?;
        let source_executed = executed.contains(&source.id);

        if skipped.contains(&source.id) && !source_executed {
            return Err(UnmetReason::SourceSkipped);
        }

        if arrow.is_first_only() {
            return if source_executed {
                Ok(())
            } else {
                Err(UnmetReason::FirstOnlyNoData)
            };
        }

        let has_data =
            source_executed || source.id == node_id || source.node_type() == NodeType::Start;
        if !has_data {
            return Err(UnmetReason::MissingData);
        }

        if source.node_type() == NodeType::Condition {
            let value = condition_values
                .get(&source.id)
                .ok_or(UnmetReason::ConditionNotEvaluated)?;
            if let Some(branch) = arrow.branch() {
                if !branch.matches(*value) {
                    return Err(UnmetReason::WrongBranch);
                }
            }
        }

        Ok(())
    }

    /// Targets reachable from a completed node; duplicates are kept
    pub fn get_next_nodes(&self, node_id: &str, condition_values: &HashMap<String, bool>) -> Vec<String> {
        let is_condition = self
            .graph
            .node(node_id)
            .is_some_and(|node| node.node_type() == NodeType::Condition);
        let value = condition_values.get(node_id).copied();

        self.graph
            .outgoing(node_id)
            .iter()
            .filter(|arrow| match (is_condition, arrow.branch()) {
                (true, Some(branch)) => value.is_some_and(|value| branch.matches(value)),
                _ => true,
            })
            .map(|arrow| arrow.target.clone())
            .collect()
    }

    /// Every cycle found by a depth-first walk, as the node path from the
    /// back-edge target round to itself (`[a, b, c, a]`)
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();

        for root in self.graph.node_ids() {
            if visited.contains(root.as_str()) {
                continue;
            }

            // (node, index of the next outgoing arrow to explore)
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
            let mut path: Vec<&str> = vec![root.as_str()];
            visited.insert(root.as_str());
            on_stack.insert(root.as_str());

            while let Some(frame) = stack.last_mut() {
                let current = frame.0;
                let outgoing = self.graph.outgoing(current);
                if frame.1 >= outgoing.len() {
                    on_stack.remove(current);
                    path.pop();
                    stack.pop();
                    continue;
                }

                let target = outgoing[frame.1].target.as_str();
                frame.1 += 1;

                if on_stack.contains(target) {
                    if let Some(start) = path.iter().position(|id| *id == target) {
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|id| id.to_string()).collect();
                        cycle.push(target.to_string());
                        cycles.push(cycle);
                    }
                } else if visited.insert(target) {
                    on_stack.insert(target);
                    path.push(target);
                    stack.push((target, 0));
                }
            }
        }

        if !cycles.is_empty() {
            tracing::info!("🔁 Detected {} cycle(s): {:?}", cycles.len(), cycles);
        }
        cycles
    }

    /// Reverse depth-first finish order, starting from the initial nodes
    ///
    /// Tolerates cycles: back edges are simply not followed twice.
    pub fn topological_sort(&self) -> Vec<String> {
        let (graph, indices) = self.graph.to_digraph();
        let mut dfs = DfsPostOrder::empty(&graph);
        let mut finished = Vec::with_capacity(graph.node_count());

        let roots = self.initial_nodes();
        let rest = self.graph.node_ids().iter().filter(|id| !roots.contains(id));
        for id in roots.iter().chain(rest) {
            // Already-finished roots yield nothing
            dfs.move_to(indices[id]);
            while let Some(done) = dfs.next(&graph) {
                finished.push(graph[done].clone());
            }
        }

        finished.reverse();
        finished
    }

    /// Distinct upstream node ids, in arrow order
    pub fn dependencies(&self, node_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.graph
            .incoming(node_id)
            .iter()
            .filter(|arrow| seen.insert(arrow.source.as_str()))
            .map(|arrow| arrow.source.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Branch, Diagram, Node, NodeData, PersonJobData};

    fn resolver(nodes: Vec<Node>, arrows: Vec<Arrow>) -> DependencyResolver {
        DependencyResolver::new(Arc::new(GraphIndex::build(&Diagram { nodes, arrows })))
    }

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn person(id: &str) -> Node {
        Node::new(id, NodeData::PersonJob(PersonJobData::default()))
    }

    #[test]
    fn start_nodes_are_found_in_order() {
        let r = resolver(
            vec![Node::start("s2", None), Node::job("j", ""), Node::start("s1", None)],
            vec![],
        );
        assert_eq!(r.validate_start_nodes(), vec!["s2", "s1"]);
    }

    #[test]
    fn condition_arrows_need_value_and_branch() {
        let r = resolver(
            vec![Node::start("s", None), Node::condition("c", "x"), Node::endpoint("t"), Node::endpoint("f")],
            vec![
                Arrow::new("a0", "s", "c"),
                Arrow::new("a1", "c", "t").with_branch(Branch::True),
                Arrow::new("a2", "c", "f").with_branch(Branch::False),
            ],
        );
        let executed = set(&["s", "c"]);
        let none = HashMap::new();
        let check = r.check_dependencies_met("t", &executed, &none, &HashSet::new());
        assert!(!check.met);
        assert_eq!(check.unmet, vec![("a1".to_string(), UnmetReason::ConditionNotEvaluated)]);

        let values = HashMap::from([("c".to_string(), true)]);
        assert!(r.check_dependencies_met("t", &executed, &values, &HashSet::new()).met);
        let check = r.check_dependencies_met("f", &executed, &values, &HashSet::new());
        assert_eq!(check.unmet, vec![("a2".to_string(), UnmetReason::WrongBranch)]);

        assert_eq!(r.get_next_nodes("c", &values), vec!["t"]);
        assert!(r.get_next_nodes("c", &none).is_empty());
    }

    #[test]
    fn untagged_condition_arrows_always_pass() {
        let r = resolver(
            vec![Node::condition("c", "x"), Node::endpoint("e")],
            vec![Arrow::new("a", "c", "e")],
        );
        let values = HashMap::from([("c".to_string(), false)]);
        assert_eq!(r.get_next_nodes("c", &values), vec!["e"]);
    }

    #[test]
    fn memory_bearing_node_starts_on_first_only_input() {
        let r = resolver(
            vec![Node::start("s", None), person("p"), Node::job("b", "")],
            vec![
                Arrow::new("first", "s", "p").first_only(),
                Arrow::new("loop", "b", "p"),
                Arrow::new("back", "p", "b"),
            ],
        );
        let executed = set(&["s"]);
        let values = HashMap::new();
        assert!(r.check_dependencies_met("p", &executed, &values, &HashSet::new()).met);

        // Once consumed, the regular input is required again
        let consumed = set(&["p"]);
        let check = r.check_dependencies_met("p", &executed, &values, &consumed);
        assert!(!check.met);
        assert_eq!(check.unmet, vec![("loop".to_string(), UnmetReason::MissingData)]);
    }

    #[test]
    fn non_memory_bearing_nodes_ignore_the_override() {
        let r = resolver(
            vec![Node::start("s", None), Node::job("j", ""), Node::job("b", "")],
            vec![Arrow::new("first", "s", "j").first_only(), Arrow::new("other", "b", "j")],
        );
        let check = r.check_dependencies_met("j", &set(&["s"]), &HashMap::new(), &HashSet::new());
        assert!(!check.met);
    }

    #[test]
    fn skipped_sources_block_their_targets() {
        let r = resolver(
            vec![Node::start("s", None), Node::job("j", "")],
            vec![Arrow::new("a", "s", "j")],
        );
        let check = r.check_dependencies_with_skips(
            "j",
            &HashSet::new(),
            &HashMap::new(),
            &HashSet::new(),
            &set(&["s"]),
        );
        assert!(!check.met);
        assert_eq!(check.unmet, vec![("a".to_string(), UnmetReason::SourceSkipped)]);
    }

    #[test]
    fn self_loops_count_as_data() {
        let r = resolver(
            vec![Node::start("s", None), Node::job("j", "")],
            vec![Arrow::new("a", "s", "j"), Arrow::new("self", "j", "j")],
        );
        assert!(r.check_dependencies_met("j", &HashSet::new(), &HashMap::new(), &HashSet::new()).met);
    }

    #[test]
    fn cycles_are_reported_with_closing_node() {
        let r = resolver(
            vec![Node::start("s", None), Node::job("a", ""), Node::job("b", ""), Node::job("c", "")],
            vec![
                Arrow::new("1", "s", "a"),
                Arrow::new("2", "a", "b"),
                Arrow::new("3", "b", "c"),
                Arrow::new("4", "c", "a"),
            ],
        );
        assert_eq!(r.detect_cycles(), vec![vec!["a", "b", "c", "a"]]);
    }

    #[test]
    fn pairs_nothing_feeds_are_unreachable() {
        let r = resolver(
            vec![Node::start("s", None), Node::job("x", ""), Node::job("y", ""), Node::endpoint("e")],
            vec![Arrow::new("1", "x", "y"), Arrow::new("2", "y", "x"), Arrow::new("3", "y", "e")],
        );
        assert_eq!(r.unreachable_nodes(), vec!["x", "y", "e"]);

        let fed = resolver(
            vec![Node::start("s", None), Node::job("x", ""), Node::job("y", "")],
            vec![Arrow::new("0", "s", "x"), Arrow::new("1", "x", "y"), Arrow::new("2", "y", "x")],
        );
        assert!(fed.unreachable_nodes().is_empty());
    }

    #[test]
    fn topological_order_respects_edges() {
        let r = resolver(
            vec![Node::endpoint("e"), Node::job("j", ""), Node::start("s", None)],
            vec![Arrow::new("1", "s", "j"), Arrow::new("2", "j", "e"), Arrow::new("3", "s", "e")],
        );
        assert_eq!(r.topological_sort(), vec!["s", "j", "e"]);
        assert_eq!(r.dependencies("e"), vec!["j", "s"]);
    }
}
