//! Interviewer trait and built-in implementations for human interaction.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dotflow_types::{DotflowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleSelect,
    MultiSelect,
    FreeText,
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewOption {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<InterviewOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default)]
    pub selected_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
}

impl Answer {
    pub fn selected(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            selected_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn confirmed(value: bool) -> Self {
        Self {
            confirmed: Some(value),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Interviewer: Send + Sync {
    async fn ask(&self, question: &Question) -> Result<Answer>;
}

// ---------------------------------------------------------------------------
// AutoApproveInterviewer
// ---------------------------------------------------------------------------

/// Picks the first option, every option, or "yes", depending on the question.
pub struct AutoApproveInterviewer;

impl AutoApproveInterviewer {
    fn answer(question: &Question) -> Answer {
        match question.question_type {
            QuestionType::SingleSelect => {
                Answer::selected(question.options.first().map(|o| o.id.clone()))
            }
            QuestionType::MultiSelect => {
                Answer::selected(question.options.iter().map(|o| o.id.clone()))
            }
            QuestionType::Confirm => Answer::confirmed(true),
            QuestionType::FreeText => Answer::text(""),
        }
    }
}

#[async_trait]
impl Interviewer for AutoApproveInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        Ok(Self::answer(question))
    }
}

// ---------------------------------------------------------------------------
// QueueInterviewer
// ---------------------------------------------------------------------------

/// A pre-seeded answer. Raw strings are interpreted per question type.
#[derive(Debug, Clone)]
pub enum QueuedAnswer {
    Raw(String),
    Answer(Answer),
}

impl From<&str> for QueuedAnswer {
    fn from(value: &str) -> Self {
        QueuedAnswer::Raw(value.to_string())
    }
}

impl From<String> for QueuedAnswer {
    fn from(value: String) -> Self {
        QueuedAnswer::Raw(value)
    }
}

impl From<Answer> for QueuedAnswer {
    fn from(value: Answer) -> Self {
        QueuedAnswer::Answer(value)
    }
}

/// Replays answers in order, then behaves like [`AutoApproveInterviewer`].
pub struct QueueInterviewer {
    answers: Mutex<VecDeque<QueuedAnswer>>,
    asked: Mutex<Vec<Question>>,
}

impl QueueInterviewer {
    pub fn new<A: Into<QueuedAnswer>>(answers: impl IntoIterator<Item = A>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Questions received so far, in order.
    pub fn questions(&self) -> Vec<Question> {
        self.asked.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn coerce(raw: String, question: &Question) -> Answer {
        match question.question_type {
            QuestionType::SingleSelect => Answer::selected([raw]),
            QuestionType::MultiSelect => Answer::selected(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            ),
            QuestionType::Confirm => {
                let lowered = raw.to_lowercase();
                Answer::confirmed(lowered == "yes" || lowered == "true")
            }
            QuestionType::FreeText => Answer::text(raw),
        }
    }
}

#[async_trait]
impl Interviewer for QueueInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        self.asked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(question.clone());
        let next = self
            .answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(match next {
            Some(QueuedAnswer::Answer(answer)) => answer,
            Some(QueuedAnswer::Raw(raw)) => Self::coerce(raw, question),
            None => AutoApproveInterviewer::answer(question),
        })
    }
}

// ---------------------------------------------------------------------------
// CallbackInterviewer
// ---------------------------------------------------------------------------

type AnswerFn = dyn Fn(&Question) -> Result<Answer> + Send + Sync;

/// Delegates every question to a closure.
pub struct CallbackInterviewer {
    callback: Box<AnswerFn>,
}

impl CallbackInterviewer {
    pub fn new(callback: impl Fn(&Question) -> Result<Answer> + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl Interviewer for CallbackInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        (self.callback)(question)
    }
}

// ---------------------------------------------------------------------------
// ConsoleInterviewer
// ---------------------------------------------------------------------------

pub struct ConsoleInterviewer;

impl ConsoleInterviewer {
    async fn read_line(prompt: &str) -> Result<String> {
        print!("{prompt}");
        let line = tokio::task::spawn_blocking(|| {
            use std::io::Write;
            std::io::stdout().flush()?;
            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;
            Ok::<_, std::io::Error>(input)
        })
        .await
        .map_err(|e| DotflowError::Other(format!("console input task failed: {e}")))??;
        Ok(line)
    }
}

#[async_trait]
impl Interviewer for ConsoleInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        println!("\n{}", question.prompt);
        for (i, option) in question.options.iter().enumerate() {
            let description = option
                .description
                .as_deref()
                .map(|d| format!(" - {d}"))
                .unwrap_or_default();
            println!("  {}. {} ({}){}", i + 1, option.label, option.id, description);
        }

        match question.question_type {
            QuestionType::SingleSelect => {
                let raw = Self::read_line("Select one option (index or id): ").await?;
                Ok(Answer::selected(resolve_option_selection(&raw, &question.options)))
            }
            QuestionType::MultiSelect => {
                let raw =
                    Self::read_line("Select options (comma-separated indexes or ids): ").await?;
                let mut ids: Vec<String> = Vec::new();
                for id in raw
                    .split(',')
                    .filter_map(|part| resolve_option_selection(part, &question.options))
                {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                Ok(Answer::selected(ids))
            }
            QuestionType::Confirm => {
                let raw = Self::read_line("Confirm? (y/n): ").await?;
                let normalized = raw.trim().to_lowercase();
                Ok(Answer::confirmed(normalized == "y" || normalized == "yes"))
            }
            QuestionType::FreeText => {
                let raw = Self::read_line("Answer: ").await?;
                Ok(Answer::text(raw.trim_end_matches(['\r', '\n'])))
            }
        }
    }
}

/// Map console input to an option id: a 1-based index, else an exact id.
pub fn resolve_option_selection(input: &str, options: &[InterviewOption]) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(index) = trimmed.parse::<usize>() {
        if (1..=options.len()).contains(&index) {
            return Some(options[index - 1].id.clone());
        }
    }
    options
        .iter()
        .find(|o| o.id == trimmed)
        .map(|o| o.id.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
