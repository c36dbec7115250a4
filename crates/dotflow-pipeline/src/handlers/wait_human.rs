//! WaitHumanHandler: asks an interviewer which outgoing edge to take.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use dotflow_dot::Edge;
use dotflow_types::{Outcome, Result};

use crate::handler::{HandlerContext, NodeHandler};
use crate::interviewer::{Answer, InterviewOption, Interviewer, Question, QuestionType};

pub struct WaitHumanHandler {
    interviewer: Arc<dyn Interviewer>,
}

impl WaitHumanHandler {
    pub fn new(interviewer: Arc<dyn Interviewer>) -> Self {
        Self { interviewer }
    }
}

/// One option per outgoing edge, keyed by edge label or target id.
fn edge_option(edge: &Edge) -> InterviewOption {
    let key = edge
        .label()
        .filter(|l| !l.is_empty())
        .unwrap_or(&edge.to)
        .to_string();
    InterviewOption {
        id: key.clone(),
        label: key,
        description: Some(format!("Route to {}", edge.to)),
    }
}

/// The option the answer refers to: by id, then by label, else the first.
fn chosen_index(answer: &Answer, options: &[InterviewOption]) -> usize {
    let wanted = answer
        .selected_ids
        .first()
        .map(String::as_str)
        .or(answer.text.as_deref())
        .map(str::trim);

    wanted
        .and_then(|w| {
            options
                .iter()
                .position(|o| o.id == w)
                .or_else(|| options.iter().position(|o| o.label == w))
        })
        .unwrap_or(0)
}

#[async_trait]
impl NodeHandler for WaitHumanHandler {
    fn handler_type(&self) -> &str {
        "wait.human"
    }

    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Outcome> {
        let node = ctx.node;
        if ctx.outgoing_edges.is_empty() {
            return Ok(Outcome::fail("wait.human node has no outgoing options"));
        }

        let options: Vec<InterviewOption> = ctx.outgoing_edges.iter().map(|e| edge_option(e)).collect();
        let question = Question {
            id: format!("wait-human:{}", node.id),
            question_type: QuestionType::SingleSelect,
            prompt: node
                .str_attr("prompt")
                .filter(|p| !p.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("Select next step for {}", node.id)),
            options,
        };

        tracing::info!(node = %node.id, options = question.options.len(), "waiting for human selection");
        let answer = self.interviewer.ask(&question).await?;

        let index = chosen_index(&answer, &question.options);
        let option = &question.options[index];
        let target = &ctx.outgoing_edges[index].to;
        tracing::info!(node = %node.id, selection = %option.label, target = %target, "human selection received");

        Ok(Outcome::success(format!("Human selected '{}'", option.label))
            .with_label(option.label.clone())
            .with_suggested(target.clone())
            .with_update(
                format!("wait_human.{}.selection", node.id),
                Value::String(option.label.clone()),
            )
            .with_update("preferred_label", Value::String(option.label.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineGraph;
    use crate::interviewer::{AutoApproveInterviewer, QueueInterviewer};
    use dotflow_types::{Context, StageStatus};
    use std::path::Path;

    fn review_graph() -> PipelineGraph {
        PipelineGraph::new(
            dotflow_dot::parse(
                r#"digraph G {
                    review [shape=hexagon, prompt="Ship it?"]
                    review -> ship [label="Approve"]
                    review -> fix [label="Reject"]
                    review -> notes
                }"#,
            )
            .unwrap(),
        )
    }

    async fn ask(interviewer: Arc<dyn Interviewer>, graph: &PipelineGraph, id: &str) -> Outcome {
        let edges = graph.outgoing_edges(id);
        let ctx = HandlerContext {
            graph,
            node: graph.node(id).unwrap(),
            context: &Context::new(),
            logs_root: Path::new("/tmp"),
            stage_dir: Path::new("/tmp"),
            outgoing_edges: &edges,
        };
        WaitHumanHandler::new(interviewer).execute(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn question_lists_edges_as_options() {
        let queue = Arc::new(QueueInterviewer::new(["Reject"]));
        let graph = review_graph();
        let outcome = ask(queue.clone(), &graph, "review").await;

        let asked = queue.questions();
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0].id, "wait-human:review");
        assert_eq!(asked[0].prompt, "Ship it?");
        assert_eq!(asked[0].question_type, QuestionType::SingleSelect);
        let ids: Vec<_> = asked[0].options.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["Approve", "Reject", "notes"]);
        assert_eq!(asked[0].options[2].description.as_deref(), Some("Route to notes"));

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.preferred_label.as_deref(), Some("Reject"));
        assert_eq!(outcome.suggested_next_ids, vec!["fix"]);
        assert_eq!(outcome.notes.as_deref(), Some("Human selected 'Reject'"));
        assert_eq!(outcome.context_updates["wait_human.review.selection"], "Reject");
        assert_eq!(outcome.context_updates["preferred_label"], "Reject");
    }

    #[tokio::test]
    async fn auto_approve_takes_first_option() {
        let graph = review_graph();
        let outcome = ask(Arc::new(AutoApproveInterviewer), &graph, "review").await;
        assert_eq!(outcome.preferred_label.as_deref(), Some("Approve"));
        assert_eq!(outcome.suggested_next_ids, vec!["ship"]);
    }

    #[tokio::test]
    async fn unknown_answer_falls_back_to_first() {
        let graph = review_graph();
        let outcome = ask(Arc::new(QueueInterviewer::new([Answer::text("maybe later")])), &graph, "review").await;
        assert_eq!(outcome.preferred_label.as_deref(), Some("Approve"));
    }

    #[tokio::test]
    async fn default_prompt_and_no_edges() {
        let graph = PipelineGraph::new(dotflow_dot::parse("digraph G { gate [shape=hexagon]; gate -> next }").unwrap());
        let queue = Arc::new(QueueInterviewer::new(Vec::<String>::new()));
        ask(queue.clone(), &graph, "gate").await;
        assert_eq!(queue.questions()[0].prompt, "Select next step for gate");

        let outcome = ask(queue, &graph, "next").await;
        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(outcome.notes.as_deref(), Some("wait.human node has no outgoing options"));
    }
}
