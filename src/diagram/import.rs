/// Diagram import and legacy-encoding migration
///
/// Editors have historically encoded condition branches three ways (explicit
/// `data.branch`, a `"true"`/`"false"` label, or a `-output-true`/`-output-false`
/// source-handle suffix) and first-only inputs two ways (`handle_mode` or a
/// `-input-first` target-handle suffix). Loading a diagram migrates all of them
/// to the canonical fields once, so the resolver only ever reads `branch` and
/// `handle_mode`.

use crate::diagram::types::{Arrow, Branch, Diagram, HandleMode};
use anyhow::{Context, Result};
use serde_json::Value;

impl Diagram {
    /// Parse a diagram from JSON text and normalize its arrows
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let diagram: Diagram =
            serde_json::from_str(raw).context("Failed to parse diagram JSON")?;
        Ok(diagram.normalized())
    }

    /// Build a diagram from an already-parsed JSON value and normalize its arrows
    pub fn from_value(value: Value) -> Result<Self> {
        let diagram: Diagram =
            serde_json::from_value(value).context("Failed to decode diagram")?;
        Ok(diagram.normalized())
    }

    /// Read and parse a diagram file
    pub async fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read diagram file {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Migrate every arrow to the canonical branch/handle-mode encoding
    pub fn normalized(mut self) -> Self {
        let mut migrated = 0usize;
        for arrow in &mut self.arrows {
            if normalize_arrow(arrow) {
                migrated += 1;
            }
        }
        if migrated > 0 {
            tracing::debug!("🔁 Migrated {} arrows to canonical branch/handle encoding", migrated);
        }
        self
    }
}

/// Canonicalize one arrow in place; returns whether anything changed
pub fn normalize_arrow(arrow: &mut Arrow) -> bool {
    let mut changed = false;

    if arrow.data.branch.is_none() {
        if let Some(branch) = legacy_branch(arrow) {
            arrow.data.branch = Some(branch);
            changed = true;
        }
    }

    if arrow.data.handle_mode == HandleMode::Default
        && arrow
            .target_handle
            .as_deref()
            .is_some_and(|handle| handle.ends_with("-input-first"))
    {
        arrow.data.handle_mode = HandleMode::FirstOnly;
        changed = true;
    }

    changed
}

/// Label literal first, then the source-handle suffix
fn legacy_branch(arrow: &Arrow) -> Option<Branch> {
    if let Some(branch) = arrow.data.label.as_deref().and_then(Branch::parse) {
        return Some(branch);
    }

    let handle = arrow.source_handle.as_deref()?;
    if handle.ends_with("-output-true") {
        Some(Branch::True)
    } else if handle.ends_with("-output-false") {
        Some(Branch::False)
    } else {
        None
    }
}
