//! Engine event stream.
//!
//! The executor publishes [`EngineEvent`]s on a [`tokio::sync::broadcast`]
//! channel. Observers subscribe without coupling to engine internals; when
//! nobody is listening, events are dropped.

use serde::{Deserialize, Serialize};

/// What happened. Serialized as `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PipelineEvent {
    #[serde(rename = "run.started")]
    RunStarted {
        graph_id: String,
        logs_root: String,
        checkpoint_path: String,
        resumed: bool,
    },
    #[serde(rename = "checkpoint.loaded")]
    CheckpointLoaded {
        checkpoint_path: String,
        current_node: String,
    },
    #[serde(rename = "node.started")]
    NodeStarted { node_id: String },
    #[serde(rename = "node.attempt.started")]
    AttemptStarted { node_id: String, attempt: u32 },
    #[serde(rename = "node.attempt.completed")]
    AttemptCompleted {
        node_id: String,
        attempt: u32,
        status: String,
    },
    #[serde(rename = "node.retrying")]
    NodeRetrying {
        node_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    #[serde(rename = "edge.selected")]
    EdgeSelected {
        from: String,
        to: String,
        edge_id: String,
        label: String,
    },
    #[serde(rename = "goal_gate.retry_target")]
    GoalGateRetry {
        failed_gate: String,
        retry_target: String,
    },
    #[serde(rename = "run.completed")]
    RunCompleted { status: String, current_node: String },
    #[serde(rename = "run.failed")]
    RunFailed { reason: String, current_node: String },
}

impl PipelineEvent {
    /// Dotted event name, e.g. `edge.selected`.
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. } => "run.started",
            PipelineEvent::CheckpointLoaded { .. } => "checkpoint.loaded",
            PipelineEvent::NodeStarted { .. } => "node.started",
            PipelineEvent::AttemptStarted { .. } => "node.attempt.started",
            PipelineEvent::AttemptCompleted { .. } => "node.attempt.completed",
            PipelineEvent::NodeRetrying { .. } => "node.retrying",
            PipelineEvent::EdgeSelected { .. } => "edge.selected",
            PipelineEvent::GoalGateRetry { .. } => "goal_gate.retry_target",
            PipelineEvent::RunCompleted { .. } => "run.completed",
            PipelineEvent::RunFailed { .. } => "run.failed",
        }
    }

    /// The event's fields as a JSON object.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }
}

/// A [`PipelineEvent`] stamped with its RFC 3339 emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: PipelineEvent,
}

impl EngineEvent {
    pub fn now(event: PipelineEvent) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event,
        }
    }

    /// `[timestamp] type {payload}`
    pub fn to_log_line(&self) -> String {
        format!("[{}] {} {}", self.timestamp, self.event.event_type(), self.event.payload())
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: PipelineEvent) {
        tracing::trace!(event = event.event_type(), "engine event");
        let _ = self.sender.send(EngineEvent::now(event));
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
