/// Loop Controller
///
/// Bounds re-execution of nodes that sit on a detected cycle. Only built when
/// the resolver reports at least one cycle.

use crate::runtime::error::MaxIterationsError;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct LoopController {
    max_iterations: u32,
    cyclic_nodes: HashSet<String>,
}

impl LoopController {
    pub fn new(max_iterations: u32, cycles: &[Vec<String>]) -> Self {
        let cyclic_nodes: HashSet<String> = cycles.iter().flatten().cloned().collect();
        tracing::info!(
            "🔁 Loop controller armed: {} cyclic nodes, limit {}",
            cyclic_nodes.len(),
            max_iterations
        );
        Self {
            max_iterations,
            cyclic_nodes,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn is_cyclic(&self, node_id: &str) -> bool {
        self.cyclic_nodes.contains(node_id)
    }

    /// Fails when a cyclic node that already ran `max_iterations` times is
    /// about to run again
    pub fn check(&self, node_id: &str, execution_count: u32) -> Result<(), MaxIterationsError> {
        if self.is_cyclic(node_id) && execution_count >= self.max_iterations {
            return Err(MaxIterationsError::NodeLimit {
                node_id: node_id.to_string(),
                limit: self.max_iterations,
            });
        }
        Ok(())
    }
}
