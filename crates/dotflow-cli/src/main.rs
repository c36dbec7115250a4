//! CLI binary for linting and running dotflow workflows.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use dotflow_dot::Graph;
use dotflow_pipeline::{
    apply_transforms, default_registry, validate, AutoApproveInterviewer, CodergenBackend, ConsoleInterviewer,
    EchoBackend, Interviewer, MultiProviderBackend, PipelineConfig, PipelineExecutor, PipelineGraph,
    QueueInterviewer, Severity,
};

#[derive(Parser)]
#[command(name = "dotflow", version, about = "Lint and run DOT-described workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and print engine events
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow .dot file
    Lint {
        /// Path to the workflow .dot file
        file: PathBuf,
    },

    /// Run a workflow from a .dot file
    Run {
        /// Path to the workflow .dot file
        file: PathBuf,

        /// Logs output directory (default: .dotflow-runs/<graph>-<timestamp>)
        #[arg(long)]
        logs_root: Option<PathBuf>,

        /// Continue from <logs-root>/checkpoint.json when present
        #[arg(long)]
        resume: bool,

        /// Answer every human gate with its first option
        #[arg(long)]
        auto_approve: bool,

        /// Pre-seeded answer for human gates, consumed in order (repeatable)
        #[arg(long = "answer", value_name = "VALUE")]
        answers: Vec<String>,

        /// Comma-separated codergen provider order, e.g. codex,claude
        #[arg(long)]
        codergen_order: Option<String>,

        /// Codergen backend to use
        #[arg(long, value_enum, default_value_t = BackendKind::Multi)]
        codergen_backend: BackendKind,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Multi,
    Echo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let ok = match cli.command {
        Commands::Lint { file } => cmd_lint(&file)?,
        Commands::Run {
            file,
            logs_root,
            resume,
            auto_approve,
            answers,
            codergen_order,
            codergen_backend,
        } => {
            let options = RunOptions {
                logs_root,
                resume,
                auto_approve,
                answers,
                codergen_order,
                codergen_backend,
                verbose: cli.verbose,
            };
            cmd_run(&file, options).await?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Read, parse, and transform a workflow file.
fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let mut graph = dotflow_dot::parse(&source)?;
    apply_transforms(&mut graph, &[])?;
    Ok(graph)
}

fn absolute(path: &Path) -> PathBuf {
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Print lint results; returns false when any error-severity result exists.
fn cmd_lint(path: &Path) -> anyhow::Result<bool> {
    let path = absolute(path);
    let graph = PipelineGraph::new(load_graph(&path)?);
    let results = validate(&graph);

    if results.is_empty() {
        println!("OK: {}", path.display());
        return Ok(true);
    }

    for result in &results {
        println!(
            "{} [{}] {}: {}",
            result.severity.as_str().to_uppercase(),
            result.rule,
            result.target,
            result.message
        );
    }

    Ok(!results.iter().any(|r| r.severity == Severity::Error))
}

struct RunOptions {
    logs_root: Option<PathBuf>,
    resume: bool,
    auto_approve: bool,
    answers: Vec<String>,
    codergen_order: Option<String>,
    codergen_backend: BackendKind,
    verbose: bool,
}

fn build_interviewer(options: &RunOptions) -> Arc<dyn Interviewer> {
    if options.auto_approve {
        Arc::new(AutoApproveInterviewer)
    } else if !options.answers.is_empty() {
        Arc::new(QueueInterviewer::new(options.answers.iter().cloned()))
    } else {
        Arc::new(ConsoleInterviewer)
    }
}

fn build_backend(options: &RunOptions) -> Arc<dyn CodergenBackend> {
    match options.codergen_backend {
        BackendKind::Echo => Arc::new(EchoBackend),
        BackendKind::Multi => Arc::new(MultiProviderBackend::from_env(options.codergen_order.as_deref())),
    }
}

/// Run a workflow; returns false when the run did not succeed.
async fn cmd_run(path: &Path, options: RunOptions) -> anyhow::Result<bool> {
    let path = absolute(path);
    let registry = default_registry(build_interviewer(&options), build_backend(&options));
    let executor = PipelineExecutor::new(registry);
    let graph = executor.prepare(dotflow_dot::parse(&std::fs::read_to_string(&path)?)?)?;

    let printer = options.verbose.then(|| {
        let mut rx = executor.events().subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => println!("{}", event.to_log_line()),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event printer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    });

    let config = PipelineConfig {
        logs_root: options.logs_root.as_deref().map(absolute),
        checkpoint_path: None,
        resume: options.resume,
    };
    let result = executor.run(&graph, &config).await;

    // Dropping the executor closes the event channel so the printer drains and exits.
    drop(executor);
    if let Some(handle) = printer {
        let _ = handle.await;
    }
    let result = result?;

    println!("Run status: {}", result.status);
    println!("Logs root: {}", result.logs_root.display());
    println!("Current node: {}", result.current_node);
    println!("Completed nodes: {}", result.completed_nodes.join(", "));
    if let Some(reason) = result.context.get_str("failure_reason") {
        eprintln!("Failure reason: {reason}");
    }

    Ok(result.is_success())
}
