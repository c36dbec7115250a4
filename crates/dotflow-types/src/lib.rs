//! Shared types, errors, context, and outcome for the dotflow graph engine.
//!
//! This crate provides the foundational types used across all other dotflow crates:
//! - `DotflowError`: unified error taxonomy
//! - `Context`: nested key-value store for run state
//! - `StageStatus` / `Outcome`: result of executing a node handler

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Unified error type for all dotflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum DotflowError {
    // === Parser Errors ===
    #[error("parse error at line {line}, col {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
        source_snippet: Option<String>,
    },

    // === Validation Errors ===
    #[error("{0}")]
    ValidationError(String),

    #[error("Invalid condition clause '{clause}'")]
    InvalidCondition { clause: String },

    // === Execution Errors ===
    #[error("Handler '{handler}' failed on node '{node}': {message}")]
    HandlerError {
        handler: String,
        node: String,
        message: String,
    },

    #[error("[{provider}] {message}")]
    ProviderFailed { provider: String, message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DotflowError {
    /// Errors raised before a run starts. These never become failed run results.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            DotflowError::ParseError { .. }
                | DotflowError::ValidationError(_)
                | DotflowError::InvalidCondition { .. }
        )
    }
}

/// A convenience alias for `Result<T, DotflowError>`.
pub type Result<T> = std::result::Result<T, DotflowError>;

// ---------------------------------------------------------------------------
// Context: nested key-value store for run state
// ---------------------------------------------------------------------------

/// Run-scoped store. Dotted keys are written both verbatim and as a nested
/// object path, so `set("graph.goal", v)` is visible as `"graph.goal"` and as
/// `{"graph": {"goal": v}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` at `key`, creating (or replacing non-object)
    /// intermediate objects along a dotted path.
    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value.clone());
        if !key.contains('.') {
            return;
        }

        let parts: Vec<&str> = key.split('.').collect();
        let (last, parents) = match parts.split_last() {
            Some(split) => split,
            None => return,
        };

        let mut cursor = &mut self.values;
        for part in parents {
            let entry = cursor
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            cursor = next;
        }
        cursor.insert(last.to_string(), value);
    }

    /// Insert a top-level key without dotted-path expansion.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Look up `key` as a literal key first, then as a dotted path.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(key) {
            return Some(value);
        }
        if !key.contains('.') {
            return None;
        }

        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut cursor = self.values.get(first)?;
        for part in parts {
            cursor = cursor.as_object()?.get(part)?;
        }
        Some(cursor)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.lookup(key).and_then(Value::as_str)
    }

    /// Apply every update through [`Context::set`].
    pub fn merge_updates(&mut self, updates: &Map<String, Value>) {
        for (key, value) in updates {
            self.set(key, value.clone());
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ---------------------------------------------------------------------------
// StageStatus: outcome status of a node attempt
// ---------------------------------------------------------------------------

/// Status reported by a handler. `Unknown` preserves a status string outside
/// the known set so the engine can coerce it to `Fail` with a note.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StageStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Unknown(String),
}

impl StageStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "success" => StageStatus::Success,
            "partial_success" => StageStatus::PartialSuccess,
            "retry" => StageStatus::Retry,
            "fail" => StageStatus::Fail,
            other => StageStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StageStatus::Success => "success",
            StageStatus::PartialSuccess => "partial_success",
            StageStatus::Retry => "retry",
            StageStatus::Fail => "fail",
            StageStatus::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, StageStatus::Unknown(_))
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StageStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StageStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(StageStatus::parse(&raw))
    }
}

// ---------------------------------------------------------------------------
// Outcome: result of executing a node handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_label: Option<String>,
    #[serde(default)]
    pub suggested_next_ids: Vec<String>,
    #[serde(default)]
    pub context_updates: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

impl Outcome {
    pub fn new(status: StageStatus) -> Self {
        Self {
            status,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: Map::new(),
            notes: None,
            response_text: None,
        }
    }

    /// Create a successful outcome with the given notes.
    pub fn success(notes: impl Into<String>) -> Self {
        Self::new(StageStatus::Success).with_notes(notes)
    }

    /// Create a failed outcome with the given notes.
    pub fn fail(notes: impl Into<String>) -> Self {
        Self::new(StageStatus::Fail).with_notes(notes)
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.preferred_label = Some(label.into());
        self
    }

    pub fn with_suggested(mut self, node_id: impl Into<String>) -> Self {
        self.suggested_next_ids.push(node_id.into());
        self
    }

    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }

    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.response_text = Some(text.into());
        self
    }

    /// Preferred label, ignoring empty strings.
    pub fn label(&self) -> Option<&str> {
        self.preferred_label.as_deref().filter(|l| !l.is_empty())
    }
}
