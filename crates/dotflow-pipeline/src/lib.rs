//! Workflow execution for dotflow graphs.
//!
//! This crate turns a parsed [`dotflow_dot::Graph`] into a run: transforms
//! (goal expansion, model stylesheet), lint rules, handler dispatch by node
//! kind, bounded retry with backoff, condition-driven edge selection, goal
//! gates, and a checkpoint written at every transition so a run can resume.

pub mod backend;
pub mod checkpoint;
pub mod condition;
pub mod edge_selection;
pub mod engine;
pub mod events;
pub mod goal_gate;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod interviewer;
mod process;
pub mod retry;
pub mod stylesheet;
pub mod transforms;
pub mod validation;

pub use backend::{
    parse_args, parse_provider_order, CliProvider, CliProviderRunner, CodergenBackend, CodergenRequest,
    CodergenResponse, EchoBackend, MultiProviderBackend, PromptMode, ProviderConfig, ProviderRunner,
    StructuredResponse,
};
pub use checkpoint::{default_checkpoint_path, load_checkpoint, save_checkpoint, Checkpoint};
pub use condition::{check_condition, evaluate_condition, parse_condition, Clause, ConditionExpr, ConditionRuntime, Operator};
pub use edge_selection::select_edge;
pub use engine::{default_logs_root, PipelineConfig, PipelineExecutor, RunResult, RunStatus};
pub use events::{EngineEvent, EventEmitter, PipelineEvent};
pub use goal_gate::{find_unsatisfied_gate, resolve_retry_target};
pub use graph::{NodeKind, PipelineGraph};
pub use handler::{
    default_registry, ConditionalHandler, ExitHandler, HandlerContext, HandlerRegistry, NodeHandler, StartHandler,
};
pub use handlers::{CodergenHandler, FanInHandler, ManagerLoopHandler, ParallelHandler, ToolHandler, WaitHumanHandler};
pub use interviewer::{
    Answer, AutoApproveInterviewer, CallbackInterviewer, ConsoleInterviewer, InterviewOption, Interviewer, Question,
    QuestionType, QueueInterviewer,
};
pub use retry::{BackoffPolicy, BackoffStrategy, RetryPolicy};
pub use stylesheet::{apply_stylesheet, parse_stylesheet, Declaration, Rule, Selector, Stylesheet};
pub use transforms::{apply_transforms, GoalExpansion, GraphTransform, ModelStylesheet};
pub use validation::{validate, validate_or_raise, validate_with, LintResult, LintRule, Severity};
