use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use dotflow_dot::parse_duration;
use dotflow_types::{Outcome, Result};

use super::write_artifact;
use crate::handler::{HandlerContext, NodeHandler};
use crate::process::capture;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_OUTPUT_BYTES: usize = 2 * 1024 * 1024;

// ---------------------------------------------------------------------------
// ToolHandler: runs a shell command (parallelogram shape)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ToolHandler {
    working_dir: Option<PathBuf>,
}

impl ToolHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands in `dir` instead of the process working directory.
    pub fn with_working_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }
}

enum ToolRun {
    Finished { success: bool, output: String },
    Failed(String),
}

impl ToolHandler {
    async fn run_command(&self, command: &str, timeout: Duration) -> ToolRun {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ToolRun::Failed(format!("failed to spawn command: {e}")),
        };

        let output = match tokio::time::timeout(timeout, capture(child, None, MAX_OUTPUT_BYTES)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolRun::Failed(format!("command execution failed: {e}")),
            Err(_) => {
                return ToolRun::Failed(format!(
                    "command timed out after {}ms",
                    timeout.as_millis()
                ))
            }
        };

        if output.overflowed {
            return ToolRun::Failed(format!("command output exceeded {MAX_OUTPUT_BYTES} bytes"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = [stdout.as_ref(), stderr.as_ref()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        ToolRun::Finished {
            success: output.status.success(),
            output: combined.trim().to_string(),
        }
    }
}

#[async_trait]
impl NodeHandler for ToolHandler {
    fn handler_type(&self) -> &str {
        "tool"
    }

    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Outcome> {
        let node = ctx.node;
        let command = ["command", "tool_command", "prompt"]
            .into_iter()
            .filter_map(|key| node.str_attr(key))
            .map(str::trim)
            .find(|c| !c.is_empty());

        let Some(command) = command else {
            return Ok(Outcome::fail("tool node requires command or prompt attribute"));
        };

        let timeout = node
            .attr("timeout")
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_TIMEOUT);

        tracing::info!(node = %node.id, command = %command, "executing tool command");

        let (success, text) = match self.run_command(command, timeout).await {
            ToolRun::Finished { success, output } => (success, output),
            ToolRun::Failed(reason) => (false, reason),
        };

        write_artifact("tool", &node.id, &ctx.stage_dir.join("response.md"), &format!("{text}\n")).await?;

        if success {
            tracing::info!(node = %node.id, output_len = text.len(), "tool command completed");
            Ok(Outcome::success("tool command completed")
                .with_update(format!("tool.{}.output", node.id), Value::String(text.clone()))
                .with_response(text))
        } else {
            tracing::warn!(node = %node.id, "tool command failed");
            Ok(Outcome::fail("tool command failed")
                .with_update(format!("tool.{}.error", node.id), Value::String(text.clone()))
                .with_response(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineGraph;
    use dotflow_types::{Context, StageStatus};
    use tempfile::TempDir;

    async fn run_tool(handler: &ToolHandler, attrs: &str, dir: &TempDir) -> Outcome {
        let dot = format!("digraph G {{ t [shape=parallelogram, {attrs}] }}");
        let graph = PipelineGraph::new(dotflow_dot::parse(&dot).unwrap());
        let node = graph.node("t").unwrap();
        let ctx = HandlerContext {
            graph: &graph,
            node,
            context: &Context::new(),
            logs_root: dir.path(),
            stage_dir: dir.path(),
            outgoing_edges: &[],
        };
        handler.execute(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn successful_command_sets_output() {
        let dir = TempDir::new().unwrap();
        let outcome = run_tool(&ToolHandler::new(), r#"command="echo hello; echo oops >&2""#, &dir).await;

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.notes.as_deref(), Some("tool command completed"));
        assert_eq!(outcome.context_updates["tool.t.output"], "hello\n\noops");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("response.md")).unwrap(),
            "hello\n\noops\n"
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_fail() {
        let dir = TempDir::new().unwrap();
        let outcome = run_tool(&ToolHandler::new(), r#"tool_command="echo broken >&2; false""#, &dir).await;
        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(outcome.notes.as_deref(), Some("tool command failed"));
        assert_eq!(outcome.context_updates["tool.t.error"], "broken");
    }

    #[tokio::test]
    async fn prompt_is_last_resort_command() {
        let dir = TempDir::new().unwrap();
        let outcome = run_tool(&ToolHandler::new(), r#"prompt="echo from-prompt""#, &dir).await;
        assert_eq!(outcome.context_updates["tool.t.output"], "from-prompt");
    }

    #[tokio::test]
    async fn empty_command_fails() {
        let dir = TempDir::new().unwrap();
        let outcome = run_tool(&ToolHandler::new(), r#"command="  ""#, &dir).await;
        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(
            outcome.notes.as_deref(),
            Some("tool node requires command or prompt attribute")
        );
    }

    #[tokio::test]
    async fn timeout_is_fail() {
        let dir = TempDir::new().unwrap();
        let outcome = run_tool(&ToolHandler::new(), r#"command="sleep 5", timeout="100ms""#, &dir).await;
        assert_eq!(outcome.status, StageStatus::Fail);
        let error = outcome.context_updates["tool.t.error"].as_str().unwrap();
        assert!(error.contains("timed out"), "{error}");
    }

    #[tokio::test]
    async fn oversized_output_is_fail() {
        let dir = TempDir::new().unwrap();
        let outcome = run_tool(
            &ToolHandler::new(),
            r#"command="dd if=/dev/zero bs=1024 count=3072 2>/dev/null""#,
            &dir,
        )
        .await;
        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(
            outcome.context_updates["tool.t.error"],
            format!("command output exceeded {MAX_OUTPUT_BYTES} bytes")
        );
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("marker.txt"), "here").unwrap();
        let handler = ToolHandler::with_working_dir(work.path());
        let outcome = run_tool(&handler, r#"command="cat marker.txt""#, &dir).await;
        assert_eq!(outcome.context_updates["tool.t.output"], "here");
    }
}
