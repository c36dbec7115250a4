//! Pipeline execution engine: the checkpointed traversal loop.
//!
//! Lifecycle: transform, validate, initialize (fresh or from a checkpoint),
//! then step node by node until an exit node or a terminal failure. Every
//! transition persists the checkpoint before the next step begins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use dotflow_dot::{Edge, Graph, Node};
use dotflow_types::{Context, DotflowError, Outcome, Result, StageStatus};

use crate::backend::EchoBackend;
use crate::checkpoint::{default_checkpoint_path, load_checkpoint_if_exists, save_checkpoint, Checkpoint};
use crate::edge_selection::select_edge;
use crate::events::{EventEmitter, PipelineEvent};
use crate::goal_gate::{find_unsatisfied_gate, resolve_retry_target};
use crate::graph::{NodeKind, PipelineGraph};
use crate::handler::{default_registry, HandlerContext, HandlerRegistry};
use crate::interviewer::AutoApproveInterviewer;
use crate::retry::{normalize_outcome, RetryPolicy};
use crate::transforms::{apply_transforms, GraphTransform};
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Configuration for a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Defaults to [`default_logs_root`].
    pub logs_root: Option<PathBuf>,
    /// Defaults to `<logs_root>/checkpoint.json`.
    pub checkpoint_path: Option<PathBuf>,
    /// Continue from the checkpoint when one exists.
    pub resume: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Fail,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Fail => "fail",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of a finished run. `status` is the single source of truth.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub logs_root: PathBuf,
    pub current_node: String,
    pub completed_nodes: Vec<String>,
    pub node_outcomes: BTreeMap<String, StageStatus>,
    pub context: Context,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    fn from_state(status: RunStatus, logs_root: &Path, state: Checkpoint) -> Self {
        Self {
            status,
            logs_root: logs_root.to_path_buf(),
            current_node: state.current_node,
            completed_nodes: state.completed_nodes,
            node_outcomes: state.node_outcomes,
            context: state.context,
        }
    }
}

/// Contents of `<logs_root>/<node>/status.json`.
#[derive(Serialize)]
struct StatusFile<'a> {
    outcome: &'a str,
    preferred_next_label: &'a str,
    suggested_next_ids: &'a [String],
    context_updates: &'a Map<String, Value>,
    notes: &'a str,
}

/// `.dotflow-runs/<graph_id>-<YYYY-MM-DD_HH-MM-SS>` under the current directory.
pub fn default_logs_root(graph_id: &str) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
    let relative = PathBuf::from(".dotflow-runs").join(format!("{graph_id}-{stamp}"));
    std::env::current_dir()
        .map(|cwd| cwd.join(&relative))
        .unwrap_or(relative)
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// Owns the handler registry, caller transforms, and the event emitter.
pub struct PipelineExecutor {
    registry: HandlerRegistry,
    transforms: Vec<Box<dyn GraphTransform>>,
    events: EventEmitter,
}

impl PipelineExecutor {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            transforms: Vec::new(),
            events: EventEmitter::default(),
        }
    }

    /// Auto-approving interviewer and the echo codergen backend.
    pub fn with_default_registry() -> Self {
        Self::new(default_registry(
            Arc::new(AutoApproveInterviewer),
            Arc::new(EchoBackend),
        ))
    }

    /// Add a transform that runs after the built-in passes.
    pub fn with_transform(mut self, transform: impl GraphTransform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Apply transforms and validate. Warnings are logged; errors abort.
    pub fn prepare(&self, mut graph: Graph) -> Result<PipelineGraph> {
        apply_transforms(&mut graph, &self.transforms)?;
        let graph = PipelineGraph::new(graph);
        for warning in validate_or_raise(&graph)? {
            tracing::warn!(
                rule = %warning.rule,
                target = %warning.target,
                "{}",
                warning.message
            );
        }
        Ok(graph)
    }

    /// Drive `graph` to completion. Node and routing failures come back as a
    /// `fail` [`RunResult`]; only setup and filesystem errors are `Err`.
    pub async fn run(&self, graph: &PipelineGraph, config: &PipelineConfig) -> Result<RunResult> {
        let logs_root = config
            .logs_root
            .clone()
            .unwrap_or_else(|| default_logs_root(graph.id()));
        tokio::fs::create_dir_all(&logs_root).await?;
        let checkpoint_path = config
            .checkpoint_path
            .clone()
            .unwrap_or_else(|| default_checkpoint_path(&logs_root));

        let mut state = self
            .initialize_state(graph, &logs_root, &checkpoint_path, config.resume)
            .await?;

        self.events.emit(PipelineEvent::RunStarted {
            graph_id: graph.id().to_string(),
            logs_root: logs_root.display().to_string(),
            checkpoint_path: checkpoint_path.display().to_string(),
            resumed: config.resume,
        });
        tracing::info!(
            graph = %graph.id(),
            logs_root = %logs_root.display(),
            current = %state.current_node,
            "pipeline run started"
        );

        loop {
            let Some(node) = graph.node(&state.current_node) else {
                let reason = format!("Current node '{}' not found.", state.current_node);
                return self.fail_run(state, &logs_root, &checkpoint_path, reason).await;
            };

            self.events.emit(PipelineEvent::NodeStarted {
                node_id: node.id.clone(),
            });

            if NodeKind::of(node) == NodeKind::Exit {
                if let Some(gate) = find_unsatisfied_gate(graph, &state.node_outcomes) {
                    let Some(target) = resolve_retry_target(gate, graph) else {
                        let reason = format!(
                            "Goal gate '{}' is unsatisfied and no retry target is configured.",
                            gate.id
                        );
                        return self.fail_run(state, &logs_root, &checkpoint_path, reason).await;
                    };
                    tracing::warn!(gate = %gate.id, target = %target, "goal gate unsatisfied, jumping to retry target");
                    self.events.emit(PipelineEvent::GoalGateRetry {
                        failed_gate: gate.id.clone(),
                        retry_target: target.clone(),
                    });
                    state.current_node = target;
                    self.persist(&mut state, &checkpoint_path).await?;
                    continue;
                }

                self.persist(&mut state, &checkpoint_path).await?;
                self.events.emit(PipelineEvent::RunCompleted {
                    status: RunStatus::Success.to_string(),
                    current_node: node.id.clone(),
                });
                tracing::info!(graph = %graph.id(), exit = %node.id, "pipeline run completed");
                return Ok(RunResult::from_state(RunStatus::Success, &logs_root, state));
            }

            let outgoing = graph.outgoing_edges(&node.id);
            let stage_dir = logs_root.join(&node.id);
            tokio::fs::create_dir_all(&stage_dir).await?;

            let outcome = self
                .execute_with_retry(graph, node, &mut state, &logs_root, &stage_dir, &outgoing)
                .await;
            tracing::info!(node = %node.id, status = %outcome.status, "node finished");

            state.completed_nodes.push(node.id.clone());
            state.node_outcomes.insert(node.id.clone(), outcome.status.clone());
            merge_outcome(&mut state.context, &outcome);
            write_status_file(&stage_dir, &outcome).await?;

            let Some(edge) = select_edge(&outgoing, &outcome, &state.context, &state.node_outcomes)
            else {
                let reason = format!("No eligible outgoing edge from node '{}'.", node.id);
                return self.fail_run(state, &logs_root, &checkpoint_path, reason).await;
            };

            self.events.emit(PipelineEvent::EdgeSelected {
                from: edge.from.clone(),
                to: edge.to.clone(),
                edge_id: edge.id.clone(),
                label: edge.label().unwrap_or_default().to_string(),
            });
            tracing::info!(from = %edge.from, to = %edge.to, edge = %edge.id, "edge selected");

            state.current_node = edge.to.clone();
            self.persist(&mut state, &checkpoint_path).await?;
        }
    }

    async fn initialize_state(
        &self,
        graph: &PipelineGraph,
        logs_root: &Path,
        checkpoint_path: &Path,
        resume: bool,
    ) -> Result<Checkpoint> {
        if resume {
            if let Some(checkpoint) = load_checkpoint_if_exists(checkpoint_path).await? {
                tracing::info!(
                    path = %checkpoint_path.display(),
                    current = %checkpoint.current_node,
                    "resuming from checkpoint"
                );
                self.events.emit(PipelineEvent::CheckpointLoaded {
                    checkpoint_path: checkpoint_path.display().to_string(),
                    current_node: checkpoint.current_node.clone(),
                });
                return Ok(checkpoint);
            }
            tracing::info!(path = %checkpoint_path.display(), "no checkpoint found, starting fresh");
        }

        let start = graph
            .start_node()
            .ok_or_else(|| DotflowError::ValidationError("Failed to resolve start node.".into()))?;
        let mut state = Checkpoint::new(graph.id(), logs_root, start.id.clone());
        for (key, value) in graph.attrs() {
            state.context.set(&format!("graph.{key}"), value.to_json());
        }
        Ok(state)
    }

    async fn execute_with_retry(
        &self,
        graph: &PipelineGraph,
        node: &Node,
        state: &mut Checkpoint,
        logs_root: &Path,
        stage_dir: &Path,
        outgoing: &[&Edge],
    ) -> Outcome {
        let policy = RetryPolicy::for_node(node, graph);
        let handler = self.registry.resolve(node);
        let mut attempt: u32 = 0;

        loop {
            self.events.emit(PipelineEvent::AttemptStarted {
                node_id: node.id.clone(),
                attempt,
            });

            let raw = match &handler {
                Some(handler) => {
                    let ctx = HandlerContext {
                        graph,
                        node,
                        context: &state.context,
                        logs_root,
                        stage_dir,
                        outgoing_edges: outgoing,
                    };
                    match handler.execute(&ctx).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            tracing::warn!(node = %node.id, handler = handler.handler_type(), error = %err, "handler returned an error");
                            Outcome::fail(err.to_string())
                        }
                    }
                }
                None => Outcome::fail(format!(
                    "no handler registered for node kind '{}'",
                    NodeKind::of(node)
                )),
            };
            let outcome = normalize_outcome(raw);

            self.events.emit(PipelineEvent::AttemptCompleted {
                node_id: node.id.clone(),
                attempt,
                status: outcome.status.to_string(),
            });

            if policy.accepts(&outcome) {
                return outcome;
            }

            if policy.should_retry(&outcome, attempt) {
                attempt += 1;
                state.retry_counts.insert(node.id.clone(), attempt);
                let delay = policy.backoff.delay_for_attempt(attempt);
                let delay_ms = delay.as_millis() as u64;
                tracing::warn!(
                    node = %node.id,
                    attempt,
                    delay_ms,
                    status = %outcome.status,
                    "retrying node"
                );
                self.events.emit(PipelineEvent::NodeRetrying {
                    node_id: node.id.clone(),
                    attempt,
                    delay_ms,
                });
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            return policy.finish(outcome);
        }
    }

    async fn persist(&self, state: &mut Checkpoint, path: &Path) -> Result<()> {
        state.touch();
        save_checkpoint(state, path).await
    }

    async fn fail_run(
        &self,
        mut state: Checkpoint,
        logs_root: &Path,
        checkpoint_path: &Path,
        reason: String,
    ) -> Result<RunResult> {
        tracing::warn!(current = %state.current_node, reason = %reason, "pipeline run failed");
        self.events.emit(PipelineEvent::RunFailed {
            reason: reason.clone(),
            current_node: state.current_node.clone(),
        });
        self.persist(&mut state, checkpoint_path).await?;

        let mut result = RunResult::from_state(RunStatus::Fail, logs_root, state);
        result.context.insert_raw("failure_reason", Value::String(reason));
        Ok(result)
    }
}

/// Apply `context_updates`, then record `outcome` and a non-empty `preferred_label`.
fn merge_outcome(context: &mut Context, outcome: &Outcome) {
    context.merge_updates(&outcome.context_updates);
    context.set("outcome", Value::String(outcome.status.to_string()));
    if let Some(label) = outcome.label() {
        context.set("preferred_label", Value::String(label.to_string()));
    }
}

async fn write_status_file(stage_dir: &Path, outcome: &Outcome) -> Result<()> {
    let status = StatusFile {
        outcome: outcome.status.as_str(),
        preferred_next_label: outcome.preferred_label.as_deref().unwrap_or_default(),
        suggested_next_ids: &outcome.suggested_next_ids,
        context_updates: &outcome.context_updates,
        notes: outcome.notes.as_deref().unwrap_or_default(),
    };
    let json = serde_json::to_string_pretty(&status)?;
    tokio::fs::write(stage_dir.join("status.json"), json).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
