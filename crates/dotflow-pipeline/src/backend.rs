//! Codergen backends: the boundary between codergen nodes and whatever
//! produces their text.
//!
//! [`EchoBackend`] records the prompt and succeeds. [`MultiProviderBackend`]
//! drives external coding CLIs (`codex`, `claude`) through the
//! [`ProviderRunner`] strategy trait, falling through to the next provider
//! when one fails.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

use dotflow_types::{Context, DotflowError, Result, StageStatus};

use crate::process::capture;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CodergenRequest {
    pub prompt: String,
    pub node_id: String,
    pub context: Context,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub reasoning_effort: Option<String>,
    pub timeout_ms: Option<u64>,
    pub logs_root: PathBuf,
}

impl CodergenRequest {
    pub fn new(node_id: impl Into<String>, prompt: impl Into<String>, logs_root: &Path) -> Self {
        Self {
            prompt: prompt.into(),
            node_id: node_id.into(),
            context: Context::new(),
            model: None,
            provider: None,
            reasoning_effort: None,
            timeout_ms: None,
            logs_root: logs_root.to_path_buf(),
        }
    }
}

/// Structured backend reply. A missing `status` means success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredResponse {
    pub text: String,
    pub status: Option<StageStatus>,
    pub preferred_label: Option<String>,
    pub suggested_next_ids: Vec<String>,
    pub context_updates: Map<String, Value>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodergenResponse {
    Text(String),
    Structured(StructuredResponse),
}

impl CodergenResponse {
    pub fn text(&self) -> &str {
        match self {
            CodergenResponse::Text(text) => text,
            CodergenResponse::Structured(s) => &s.text,
        }
    }
}

#[async_trait]
pub trait CodergenBackend: Send + Sync {
    async fn run(&self, request: &CodergenRequest) -> Result<CodergenResponse>;
}

// ---------------------------------------------------------------------------
// EchoBackend
// ---------------------------------------------------------------------------

/// Returns the prompt with a note that no real backend is configured.
pub struct EchoBackend;

#[async_trait]
impl CodergenBackend for EchoBackend {
    async fn run(&self, request: &CodergenRequest) -> Result<CodergenResponse> {
        Ok(CodergenResponse::Text(format!(
            "No codergen backend configured.\n\
             This run captured the prompt and marked the node as success.\n\n{}",
            request.prompt
        )))
    }
}

// ---------------------------------------------------------------------------
// Provider configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CliProvider {
    Codex,
    Claude,
}

impl CliProvider {
    pub const DEFAULT_ORDER: [CliProvider; 2] = [CliProvider::Codex, CliProvider::Claude];

    pub fn as_str(&self) -> &'static str {
        match self {
            CliProvider::Codex => "codex",
            CliProvider::Claude => "claude",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "codex" => Some(CliProvider::Codex),
            "claude" => Some(CliProvider::Claude),
            _ => None,
        }
    }

    /// Infer a provider from a `provider` or `model` value by substring.
    pub fn from_hint(hint: &str) -> Option<Self> {
        let lowered = hint.to_ascii_lowercase();
        if lowered.contains("codex") || lowered.contains("openai") {
            Some(CliProvider::Codex)
        } else if lowered.contains("claude") || lowered.contains("anthropic") {
            Some(CliProvider::Claude)
        } else {
            None
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            CliProvider::Codex => "DOTFLOW_CODEX",
            CliProvider::Claude => "DOTFLOW_CLAUDE",
        }
    }
}

impl std::fmt::Display for CliProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comma-separated provider names; unknown names are dropped, duplicates
/// removed, and an empty result falls back to `codex,claude`.
pub fn parse_provider_order(raw: &str) -> Vec<CliProvider> {
    let mut order = Vec::new();
    for provider in raw.split(',').filter_map(CliProvider::parse) {
        if !order.contains(&provider) {
            order.push(provider);
        }
    }
    if order.is_empty() {
        order.extend(CliProvider::DEFAULT_ORDER);
    }
    order
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Prompt is the final command-line argument.
    Arg,
    /// Prompt is written to the child's stdin.
    Stdin,
}

impl PromptMode {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("stdin") {
            PromptMode::Stdin
        } else {
            PromptMode::Arg
        }
    }
}

const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider: CliProvider,
    pub command: String,
    pub base_args: Vec<String>,
    pub prompt_mode: PromptMode,
    pub model_flag: Option<String>,
    pub reasoning_effort_flag: Option<String>,
    pub default_timeout_ms: u64,
}

impl ProviderConfig {
    pub fn defaults(provider: CliProvider) -> Self {
        match provider {
            CliProvider::Codex => Self {
                provider,
                command: "codex".into(),
                base_args: parse_args("exec --skip-git-repo-check --full-auto"),
                prompt_mode: PromptMode::Arg,
                model_flag: Some("-m".into()),
                reasoning_effort_flag: None,
                default_timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
            },
            CliProvider::Claude => Self {
                provider,
                command: "claude".into(),
                base_args: parse_args("-p"),
                prompt_mode: PromptMode::Arg,
                model_flag: Some("--model".into()),
                reasoning_effort_flag: Some("--effort".into()),
                default_timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
            },
        }
    }

    /// Read `DOTFLOW_<PROVIDER>_*` variables from the process environment.
    pub fn from_env(provider: CliProvider) -> Self {
        Self::from_lookup(provider, |key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` on top of [`ProviderConfig::defaults`].
    pub fn from_lookup(provider: CliProvider, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::defaults(provider);
        let prefix = provider.env_prefix();
        let var = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));

        if let Some(bin) = var("BIN").filter(|b| !b.trim().is_empty()) {
            config.command = bin;
        }
        if let Some(args) = var("ARGS") {
            config.base_args = parse_args(&args);
        }
        if let Some(mode) = var("PROMPT_MODE") {
            config.prompt_mode = PromptMode::parse(&mode);
        }
        if let Some(flag) = var("MODEL_FLAG") {
            config.model_flag = Some(flag).filter(|f| !f.is_empty());
        }
        if provider == CliProvider::Claude {
            if let Some(flag) = var("REASONING_EFFORT_FLAG") {
                config.reasoning_effort_flag = Some(flag).filter(|f| !f.is_empty());
            }
        }
        if let Some(timeout) = var("TIMEOUT_MS") {
            config.default_timeout_ms = match timeout.trim().parse::<i64>() {
                Ok(ms) if ms > 0 => ms as u64,
                _ => DEFAULT_PROVIDER_TIMEOUT_MS,
            };
        }
        config
    }

    /// Full argument list for `request`, prompt included in `Arg` mode.
    pub fn build_args(&self, request: &CodergenRequest) -> Vec<String> {
        let mut args = self.base_args.clone();
        if let (Some(model), Some(flag)) = (non_empty(&request.model), &self.model_flag) {
            args.push(flag.clone());
            args.push(model.to_string());
        }
        if let (Some(effort), Some(flag)) =
            (non_empty(&request.reasoning_effort), &self.reasoning_effort_flag)
        {
            args.push(flag.clone());
            args.push(effort.to_string());
        }
        if self.prompt_mode == PromptMode::Arg {
            args.push(request.prompt.clone());
        }
        args
    }

    pub fn timeout_for(&self, request: &CodergenRequest) -> Duration {
        let ms = request
            .timeout_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn args_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#""((?:\\.|[^"\\])*)"|'((?:\\.|[^'\\])*)'|(\S+)"#).expect("static regex")
    })
}

/// Split an argument string shell-style: double-quoted, single-quoted, or
/// bare words. Escaped quotes inside a quoted word are unescaped.
pub fn parse_args(raw: &str) -> Vec<String> {
    args_pattern()
        .captures_iter(raw)
        .filter_map(|caps| {
            if let Some(dq) = caps.get(1) {
                Some(dq.as_str().replace("\\\"", "\""))
            } else if let Some(sq) = caps.get(2) {
                Some(sq.as_str().replace("\\'", "'"))
            } else {
                caps.get(3).map(|bare| bare.as_str().to_string())
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ProviderRunner
// ---------------------------------------------------------------------------

/// One way of turning a request into text.
#[async_trait]
pub trait ProviderRunner: Send + Sync {
    fn provider(&self) -> CliProvider;
    async fn run(&self, request: &CodergenRequest) -> Result<String>;
}

/// Per-stream cap on what a provider may print before the run is failed.
const MAX_PROVIDER_OUTPUT_BYTES: usize = 8 * 1024 * 1024;

/// Runs a provider's CLI as a child process.
pub struct CliProviderRunner {
    config: ProviderConfig,
    working_dir: Option<PathBuf>,
}

impl CliProviderRunner {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn failure(&self, message: impl Into<String>) -> DotflowError {
        DotflowError::ProviderFailed {
            provider: self.config.provider.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ProviderRunner for CliProviderRunner {
    fn provider(&self) -> CliProvider {
        self.config.provider
    }

    async fn run(&self, request: &CodergenRequest) -> Result<String> {
        let args = self.config.build_args(request);
        let timeout = self.config.timeout_for(request);
        tracing::debug!(
            provider = %self.config.provider,
            command = %self.config.command,
            node = %request.node_id,
            timeout_ms = timeout.as_millis() as u64,
            "invoking codergen provider"
        );

        let mut cmd = tokio::process::Command::new(&self.config.command);
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.stdin(match self.config.prompt_mode {
            PromptMode::Stdin => Stdio::piped(),
            PromptMode::Arg => Stdio::null(),
        });
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| self.failure(format!("failed to spawn '{}': {e}", self.config.command)))?;

        let input = match self.config.prompt_mode {
            PromptMode::Stdin => Some(request.prompt.clone()),
            PromptMode::Arg => None,
        };
        let output = match tokio::time::timeout(timeout, capture(child, input, MAX_PROVIDER_OUTPUT_BYTES)).await {
            Ok(result) => result.map_err(|e| self.failure(e.to_string()))?,
            Err(_) => {
                return Err(DotflowError::CommandTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };
        if output.overflowed {
            return Err(self.failure(format!("output exceeded {MAX_PROVIDER_OUTPUT_BYTES} bytes")));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let reason = [stderr, stdout]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or_else(|| format!("command exited with {}", output.status));
            return Err(self.failure(reason));
        }

        Ok(if stdout.is_empty() { stderr } else { stdout })
    }
}

// ---------------------------------------------------------------------------
// MultiProviderBackend
// ---------------------------------------------------------------------------

/// Ordered providers with linear fallthrough on failure.
pub struct MultiProviderBackend {
    runners: Vec<Box<dyn ProviderRunner>>,
    fallback_on_error: bool,
}

impl MultiProviderBackend {
    pub fn new(runners: Vec<Box<dyn ProviderRunner>>) -> Self {
        Self {
            runners,
            fallback_on_error: true,
        }
    }

    /// CLI runners configured from the environment. `order` overrides
    /// `DOTFLOW_CODEGEN_PROVIDER_ORDER`.
    pub fn from_env(order: Option<&str>) -> Self {
        let raw = order
            .map(String::from)
            .or_else(|| std::env::var("DOTFLOW_CODEGEN_PROVIDER_ORDER").ok())
            .unwrap_or_else(|| "codex,claude".to_string());
        let runners = parse_provider_order(&raw)
            .into_iter()
            .map(|p| Box::new(CliProviderRunner::new(ProviderConfig::from_env(p))) as Box<dyn ProviderRunner>)
            .collect();
        Self::new(runners)
    }

    pub fn with_fallback(mut self, fallback_on_error: bool) -> Self {
        self.fallback_on_error = fallback_on_error;
        self
    }

    /// Providers in attempt order: the hinted one first, then the rest.
    pub fn attempt_order(&self, request: &CodergenRequest) -> Vec<&dyn ProviderRunner> {
        let hint = non_empty(&request.provider)
            .or_else(|| non_empty(&request.model))
            .and_then(CliProvider::from_hint);

        let mut ordered: Vec<&dyn ProviderRunner> = Vec::with_capacity(self.runners.len());
        if let Some(hint) = hint {
            ordered.extend(self.runners.iter().filter(|r| r.provider() == hint).map(|r| r.as_ref()));
        }
        ordered.extend(
            self.runners
                .iter()
                .filter(|r| Some(r.provider()) != hint)
                .map(|r| r.as_ref()),
        );
        ordered
    }
}

#[async_trait]
impl CodergenBackend for MultiProviderBackend {
    async fn run(&self, request: &CodergenRequest) -> Result<CodergenResponse> {
        let mut failures = Vec::new();
        let mut attempted = Vec::new();

        for runner in self.attempt_order(request) {
            let provider = runner.provider();
            attempted.push(provider.as_str());
            match runner.run(request).await {
                Ok(text) => {
                    tracing::info!(node = %request.node_id, provider = %provider, "codergen provider succeeded");
                    let mut updates = Map::new();
                    updates.insert(
                        "codergen".into(),
                        json!({
                            "provider": provider.as_str(),
                            "model": request.model.clone().unwrap_or_default(),
                        }),
                    );
                    return Ok(CodergenResponse::Structured(StructuredResponse {
                        text,
                        status: Some(StageStatus::Success),
                        context_updates: updates,
                        notes: Some(format!("codergen completed using {provider}")),
                        ..StructuredResponse::default()
                    }));
                }
                Err(err) => {
                    let message = match err {
                        DotflowError::ProviderFailed { message, .. } => message,
                        other => other.to_string(),
                    };
                    tracing::warn!(node = %request.node_id, provider = %provider, error = %message, "codergen provider failed");
                    failures.push(format!("[{provider}] {message}"));
                    if !self.fallback_on_error {
                        break;
                    }
                }
            }
        }

        let mut updates = Map::new();
        updates.insert("codergen".into(), json!({ "failed_providers": attempted }));
        Ok(CodergenResponse::Structured(StructuredResponse {
            text: failures.join("\n\n"),
            status: Some(StageStatus::Fail),
            context_updates: updates,
            notes: Some("all configured codergen providers failed".into()),
            ..StructuredResponse::default()
        }))
    }
}
