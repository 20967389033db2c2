/// Graph index over a diagram's nodes and arrows
///
/// Built in a single pass: node-by-id lookup plus incoming and outgoing arrow
/// lists per node. Arrows whose endpoints don't resolve are dropped. The index
/// keeps diagram order so every traversal over it is deterministic.

use crate::diagram::{Arrow, Diagram, Node};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphIndex {
    nodes_by_id: HashMap<String, Node>,
    /// Node ids in diagram order
    node_order: Vec<String>,
    incoming_arrows: HashMap<String, Vec<Arrow>>,
    outgoing_arrows: HashMap<String, Vec<Arrow>>,
    /// Arrows that survived endpoint resolution, in diagram order
    arrows: Vec<Arrow>,
}

impl GraphIndex {
    pub fn build(diagram: &Diagram) -> Self {
        Self::from_parts(&diagram.nodes, &diagram.arrows)
    }

    pub fn from_parts(nodes: &[Node], arrows: &[Arrow]) -> Self {
        let mut index = GraphIndex::default();

        for node in nodes {
            if index.nodes_by_id.contains_key(&node.id) {
                tracing::warn!("⚠️ Duplicate node id '{}' - keeping the last definition", node.id);
            } else {
                index.node_order.push(node.id.clone());
            }
            index.nodes_by_id.insert(node.id.clone(), node.clone());
        }

        for arrow in arrows {
            if !index.nodes_by_id.contains_key(&arrow.source)
                || !index.nodes_by_id.contains_key(&arrow.target)
            {
                tracing::debug!(
                    "🔗 Ignoring arrow '{}' ({} → {}): unknown endpoint",
                    arrow.id, arrow.source, arrow.target
                );
                continue;
            }
            index
                .outgoing_arrows
                .entry(arrow.source.clone())
                .or_default()
                .push(arrow.clone());
            index
                .incoming_arrows
                .entry(arrow.target.clone())
                .or_default()
                .push(arrow.clone());
            index.arrows.push(arrow.clone());
        }

        index
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes_by_id.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes_by_id.contains_key(node_id)
    }

    pub fn nodes_by_id(&self) -> &HashMap<String, Node> {
        &self.nodes_by_id
    }

    /// Nodes in diagram order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.node_order
            .iter()
            .filter_map(move |id| self.nodes_by_id.get(id))
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_order
    }

    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    pub fn arrows(&self) -> &[Arrow] {
        &self.arrows
    }

    pub fn incoming(&self, node_id: &str) -> &[Arrow] {
        self.incoming_arrows
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn outgoing(&self, node_id: &str) -> &[Arrow] {
        self.outgoing_arrows
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn incoming_arrows(&self) -> &HashMap<String, Vec<Arrow>> {
        &self.incoming_arrows
    }

    pub fn outgoing_arrows(&self) -> &HashMap<String, Vec<Arrow>> {
        &self.outgoing_arrows
    }

    /// petgraph view of the diagram, with a node-id → index lookup
    pub fn to_digraph(&self) -> (DiGraph<String, ()>, HashMap<String, NodeIndex>) {
        let mut graph = DiGraph::with_capacity(self.node_order.len(), self.arrows.len());
        let mut indices = HashMap::with_capacity(self.node_order.len());

        for id in &self.node_order {
            indices.insert(id.clone(), graph.add_node(id.clone()));
        }
        for arrow in &self.arrows {
            graph.add_edge(indices[&arrow.source], indices[&arrow.target], ());
        }

        (graph, indices)
    }
}
