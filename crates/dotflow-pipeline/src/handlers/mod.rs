//! Node handlers beyond the basic start/exit/conditional pass-throughs.

pub mod manager;
pub mod parallel;
pub mod tool_handler;
pub mod wait_human;

pub use manager::ManagerLoopHandler;
pub use parallel::{FanInHandler, ParallelHandler};
pub use tool_handler::ToolHandler;
pub use wait_human::WaitHumanHandler;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use dotflow_dot::parse_duration;
use dotflow_types::{DotflowError, Outcome, Result, StageStatus};

use crate::backend::{CodergenBackend, CodergenRequest, CodergenResponse};
use crate::handler::{HandlerContext, NodeHandler};

/// Write a stage artifact, mapping the failure to a handler error.
pub(crate) async fn write_artifact(
    handler: &str,
    node_id: &str,
    path: &Path,
    contents: &str,
) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| DotflowError::HandlerError {
            handler: handler.into(),
            node: node_id.into(),
            message: format!("failed to write {}: {e}", path.display()),
        })
}

// ---------------------------------------------------------------------------
// CodergenHandler: prompt in, backend text out (box shape, and the default)
// ---------------------------------------------------------------------------

pub struct CodergenHandler {
    backend: Arc<dyn CodergenBackend>,
}

impl CodergenHandler {
    pub fn new(backend: Arc<dyn CodergenBackend>) -> Self {
        Self { backend }
    }

    fn request(ctx: &HandlerContext<'_>, prompt: &str) -> CodergenRequest {
        let node = ctx.node;
        let attr = |key: &str| node.str_attr(key).filter(|v| !v.is_empty()).map(String::from);
        CodergenRequest {
            prompt: prompt.to_string(),
            node_id: node.id.clone(),
            context: ctx.context.clone(),
            model: attr("llm_model"),
            provider: attr("llm_provider"),
            reasoning_effort: attr("reasoning_effort"),
            timeout_ms: node
                .attr("timeout")
                .and_then(parse_duration)
                .map(|d| d.as_millis() as u64),
            logs_root: ctx.logs_root.to_path_buf(),
        }
    }
}

#[async_trait]
impl NodeHandler for CodergenHandler {
    fn handler_type(&self) -> &str {
        "codergen"
    }

    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Outcome> {
        let node = ctx.node;
        let prompt = node
            .str_attr("prompt")
            .filter(|p| !p.is_empty())
            .or_else(|| node.str_attr("label").filter(|l| !l.is_empty()))
            .unwrap_or(&node.id)
            .to_string();

        write_artifact("codergen", &node.id, &ctx.stage_dir.join("prompt.md"), &format!("{prompt}\n")).await?;

        let request = Self::request(ctx, &prompt);
        tracing::info!(
            node = %node.id,
            model = request.model.as_deref().unwrap_or(""),
            provider = request.provider.as_deref().unwrap_or(""),
            "running codergen backend"
        );

        let response = match self.backend.run(&request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(node = %node.id, error = %err, "codergen backend error");
                return Ok(Outcome::fail(format!("codergen backend error: {err}")));
            }
        };

        let mut outcome = match response {
            CodergenResponse::Text(text) => Outcome::new(StageStatus::Success).with_response(text),
            CodergenResponse::Structured(s) => {
                let mut outcome = Outcome::new(s.status.unwrap_or(StageStatus::Success)).with_response(s.text);
                outcome.preferred_label = s.preferred_label;
                outcome.suggested_next_ids = s.suggested_next_ids;
                outcome.context_updates = s.context_updates;
                outcome.notes = s.notes;
                outcome
            }
        };

        let text = outcome.response_text.as_deref().unwrap_or_default();
        write_artifact("codergen", &node.id, &ctx.stage_dir.join("response.md"), &format!("{text}\n")).await?;

        if outcome.notes.as_deref().map_or(true, str::is_empty) {
            outcome.notes = Some("codergen completed".into());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StructuredResponse;
    use crate::graph::PipelineGraph;
    use dotflow_types::Context;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every request and replies with a fixed result.
    struct Scripted {
        reply: Mutex<Option<Result<CodergenResponse>>>,
        seen: Mutex<Vec<CodergenRequest>>,
    }

    impl Scripted {
        fn new(reply: Result<CodergenResponse>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CodergenBackend for Scripted {
        async fn run(&self, request: &CodergenRequest) -> Result<CodergenResponse> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(CodergenResponse::Text(String::new())))
        }
    }

    async fn execute(backend: Arc<dyn CodergenBackend>, dot: &str, id: &str, dir: &TempDir) -> Outcome {
        let graph = PipelineGraph::new(dotflow_dot::parse(dot).unwrap());
        let node = graph.node(id).unwrap();
        let edges = graph.outgoing_edges(id);
        let ctx = HandlerContext {
            graph: &graph,
            node,
            context: &Context::new(),
            logs_root: dir.path(),
            stage_dir: dir.path(),
            outgoing_edges: &edges,
        };
        CodergenHandler::new(backend).execute(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn artifact_write_errors_name_the_handler() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        write_artifact("tool", "t", &path, "ok\n").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "ok\n");

        let missing = dir.path().join("no-such-stage/response.md");
        match write_artifact("codergen", "plan", &missing, "x").await {
            Err(DotflowError::HandlerError { handler, node, message }) => {
                assert_eq!((handler.as_str(), node.as_str()), ("codergen", "plan"));
                assert!(message.contains("failed to write"), "{message}");
            }
            other => panic!("expected HandlerError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_response_is_success_with_artifacts() {
        let dir = TempDir::new().unwrap();
        let backend = Scripted::new(Ok(CodergenResponse::Text("all done".into())));
        let outcome = execute(
            backend.clone(),
            r#"digraph G { plan [prompt="Write a plan", llm_model="opus", llm_provider="anthropic", reasoning_effort="high", timeout="2s"] }"#,
            "plan",
            &dir,
        )
        .await;

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.notes.as_deref(), Some("codergen completed"));
        assert_eq!(outcome.response_text.as_deref(), Some("all done"));
        assert_eq!(std::fs::read_to_string(dir.path().join("prompt.md")).unwrap(), "Write a plan\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("response.md")).unwrap(), "all done\n");

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].model.as_deref(), Some("opus"));
        assert_eq!(seen[0].provider.as_deref(), Some("anthropic"));
        assert_eq!(seen[0].reasoning_effort.as_deref(), Some("high"));
        assert_eq!(seen[0].timeout_ms, Some(2000));
        assert_eq!(seen[0].node_id, "plan");
    }

    #[tokio::test]
    async fn prompt_falls_back_to_label_then_id() {
        let dir = TempDir::new().unwrap();
        let backend = Scripted::new(Ok(CodergenResponse::Text(String::new())));
        execute(backend.clone(), r#"digraph G { a [label="Label text"] }"#, "a", &dir).await;
        assert_eq!(backend.seen.lock().unwrap()[0].prompt, "Label text");

        let backend = Scripted::new(Ok(CodergenResponse::Text(String::new())));
        execute(backend.clone(), r#"digraph G { b [label=""] }"#, "b", &dir).await;
        assert_eq!(backend.seen.lock().unwrap()[0].prompt, "b");
    }

    #[tokio::test]
    async fn structured_response_carries_routing() {
        let dir = TempDir::new().unwrap();
        let mut updates = serde_json::Map::new();
        updates.insert("review.score".into(), json!(7));
        let backend = Scripted::new(Ok(CodergenResponse::Structured(StructuredResponse {
            text: "needs work".into(),
            status: Some(StageStatus::Retry),
            preferred_label: Some("Revise".into()),
            suggested_next_ids: vec!["fix".into()],
            context_updates: updates,
            notes: None,
        })));
        let outcome = execute(backend, "digraph G { review }", "review", &dir).await;

        assert_eq!(outcome.status, StageStatus::Retry);
        assert_eq!(outcome.preferred_label.as_deref(), Some("Revise"));
        assert_eq!(outcome.suggested_next_ids, vec!["fix"]);
        assert_eq!(outcome.context_updates["review.score"], json!(7));
        assert_eq!(outcome.notes.as_deref(), Some("codergen completed"));
    }

    #[tokio::test]
    async fn structured_without_status_is_success() {
        let dir = TempDir::new().unwrap();
        let backend = Scripted::new(Ok(CodergenResponse::Structured(StructuredResponse {
            text: "ok".into(),
            notes: Some("custom".into()),
            ..StructuredResponse::default()
        })));
        let outcome = execute(backend, "digraph G { n }", "n", &dir).await;
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.notes.as_deref(), Some("custom"));
    }

    #[tokio::test]
    async fn backend_error_becomes_fail() {
        let dir = TempDir::new().unwrap();
        let backend = Scripted::new(Err(DotflowError::Other("offline".into())));
        let outcome = execute(backend, "digraph G { n [prompt=go] }", "n", &dir).await;
        assert_eq!(outcome.status, StageStatus::Fail);
        assert!(outcome.notes.unwrap().contains("offline"));
        assert!(dir.path().join("prompt.md").exists());
        assert!(!dir.path().join("response.md").exists());
    }
}
