/// Skip Manager
///
/// Registry of nodes explicitly excluded from a run, each with a reason. The
/// engine consults it once per candidate per pass, before dependency checks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UserRequested,
    /// A memory-bearing node reached its own `max_iterations` ceiling
    MaxIterationsReached,
    Custom(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UserRequested => f.write_str("user_requested"),
            SkipReason::MaxIterationsReached => f.write_str("max_iterations_reached"),
            SkipReason::Custom(reason) => write!(f, "custom: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SkipManager {
    skipped: HashMap<String, SkipReason>,
}

impl SkipManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a node as skipped; a later call overwrites the reason
    pub fn skip(&mut self, node_id: impl Into<String>, reason: SkipReason) {
        let node_id = node_id.into();
        tracing::debug!("⏭️ Skipping node {} ({})", node_id, reason);
        self.skipped.insert(node_id, reason);
    }

    pub fn is_skipped(&self, node_id: &str) -> bool {
        self.skipped.contains_key(node_id)
    }

    pub fn skip_reason(&self, node_id: &str) -> Option<&SkipReason> {
        self.skipped.get(node_id)
    }

    pub fn skipped(&self) -> &HashMap<String, SkipReason> {
        &self.skipped
    }

    pub fn clear(&mut self) {
        self.skipped.clear();
    }
}
