//! The generative-AI capability as seen by the orchestrators.
//!
//! Given a structured prompt, an implementation returns structured data or
//! fails. `OpenAI` (see `openai.rs`) is the production implementation;
//! `DisabledAi` stands in when no API key is configured.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ExamPart, ExamSection, LessonPlan, LessonRequest, Source, Verdict};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AiError {
  #[error("AI generation is disabled (no API key configured)")]
  Disabled,
  #[error("provider returned HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("request failed: {0}")]
  Transport(String),
  #[error("response did not match the expected shape: {0}")]
  Parse(String),
  #[error("provider returned an empty response")]
  EmptyResponse,
  #[error("no response within {0:?}")]
  Timeout(Duration),
}

#[async_trait]
pub trait LessonAi: Send + Sync {
  /// False for the stand-in used when no provider is configured.
  fn is_enabled(&self) -> bool {
    true
  }

  /// Full lesson plan for the designer parameters.
  async fn generate_lesson_plan(&self, req: &LessonRequest) -> Result<LessonPlan, AiError>;

  /// One practice-exam reading section.
  async fn generate_exam_section(&self, part: ExamPart) -> Result<ExamSection, AiError>;

  /// A single creative topic phrase.
  async fn random_topic(&self) -> Result<String, AiError>;

  /// Deduplicated citations relevant to a passage.
  async fn find_sources(&self, passage: &str) -> Result<Vec<Source>, AiError>;

  /// Semantic-equivalence judgment of a free-text answer.
  async fn judge_answer(&self, question: &str, expected: &str, answer: &str) -> Result<Verdict, AiError>;
}

/// Bound an AI call so a stuck provider surfaces as a failure.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, AiError>
where
  F: Future<Output = Result<T, AiError>>,
{
  match tokio::time::timeout(limit, fut).await {
    Ok(res) => res,
    Err(_) => Err(AiError::Timeout(limit)),
  }
}

/// Read the one-word grading reply. Anything else is unparseable.
pub fn parse_verdict(text: &str) -> Option<Verdict> {
  let word = text
    .trim()
    .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
    .to_lowercase();
  match word.as_str() {
    "correct" => Some(Verdict::Correct),
    "incorrect" => Some(Verdict::Incorrect),
    _ => None,
  }
}

/// First line of a topic reply, without quotes.
pub fn clean_topic(text: &str) -> Option<String> {
  let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
  let cleaned: String = line.chars().filter(|c| *c != '"' && *c != '\'').collect();
  let cleaned = cleaned.trim().to_string();
  if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Capability used when no provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAi;

#[async_trait]
impl LessonAi for DisabledAi {
  fn is_enabled(&self) -> bool {
    false
  }

  async fn generate_lesson_plan(&self, _req: &LessonRequest) -> Result<LessonPlan, AiError> {
    Err(AiError::Disabled)
  }

  async fn generate_exam_section(&self, _part: ExamPart) -> Result<ExamSection, AiError> {
    Err(AiError::Disabled)
  }

  async fn random_topic(&self) -> Result<String, AiError> {
    Err(AiError::Disabled)
  }

  async fn find_sources(&self, _passage: &str) -> Result<Vec<Source>, AiError> {
    Err(AiError::Disabled)
  }

  async fn judge_answer(&self, _question: &str, _expected: &str, _answer: &str) -> Result<Verdict, AiError> {
    Err(AiError::Disabled)
  }
}
