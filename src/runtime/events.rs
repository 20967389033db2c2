/// Lifecycle events and stream sinks
///
/// The engine reports run and node lifecycle through an injected `StreamSink`.
/// Sinks are observational: nothing they do can influence scheduling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionAborted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamUpdate {
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl StreamUpdate {
    pub fn execution(update_type: UpdateType, execution_id: &str, data: Value) -> Self {
        Self {
            update_type,
            execution_id: execution_id.to_string(),
            node_id: None,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn node(update_type: UpdateType, execution_id: &str, node_id: &str, data: Value) -> Self {
        Self {
            update_type,
            execution_id: execution_id.to_string(),
            node_id: Some(node_id.to_string()),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Destination for lifecycle updates of a run
pub trait StreamSink: Send + Sync {
    fn emit(&self, update: StreamUpdate);

    fn is_enabled(&self) -> bool {
        true
    }

    fn open(&self, _execution_id: &str) {}

    fn close(&self, _execution_id: &str) {}
}

/// Fans updates out to any number of subscribers over a tokio broadcast channel
pub struct BroadcastSink {
    tx: tokio::sync::broadcast::Sender<StreamUpdate>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StreamUpdate> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StreamSink for BroadcastSink {
    fn emit(&self, update: StreamUpdate) {
        // No receivers is fine
        let _ = self.tx.send(update);
    }

    fn is_enabled(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}

/// Writes every update to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StreamSink for TracingSink {
    fn emit(&self, update: StreamUpdate) {
        match update.update_type {
            UpdateType::ExecutionFailed | UpdateType::NodeFailed => tracing::warn!(
                "📡 [{}] {:?} {} {}",
                update.execution_id,
                update.update_type,
                update.node_id.as_deref().unwrap_or("-"),
                update.data
            ),
            _ => tracing::info!(
                "📡 [{}] {:?} {}",
                update.execution_id,
                update.update_type,
                update.node_id.as_deref().unwrap_or("-")
            ),
        }
    }

    fn open(&self, execution_id: &str) {
        tracing::debug!("📡 Stream opened for {}", execution_id);
    }

    fn close(&self, execution_id: &str) {
        tracing::debug!("📡 Stream closed for {}", execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        assert!(!sink.is_enabled());

        let mut rx = sink.subscribe();
        assert!(sink.is_enabled());

        sink.emit(StreamUpdate::node(UpdateType::NodeCompleted, "run-1", "n1", json!({"ok": true})));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.update_type, UpdateType::NodeCompleted);
        assert_eq!(update.node_id.as_deref(), Some("n1"));
    }

    #[test]
    fn update_type_serializes_under_type_key() {
        let update = StreamUpdate::execution(UpdateType::ExecutionStarted, "run-1", Value::Null);
        let raw = serde_json::to_value(&update).unwrap();
        assert_eq!(raw["type"], json!("execution_started"));
        assert!(raw.get("node_id").is_none());
    }
}
