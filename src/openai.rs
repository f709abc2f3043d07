//! Minimal OpenAI client for our use-cases.
//!
//! We only call chat.completions and request either plain text or a strict JSON object.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to avoid PII leaks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::ai::{clean_topic, parse_verdict, AiError, LessonAi};
use crate::config::Prompts;
use crate::domain::{
  dedupe_sources, ExamPart, ExamSection, GeneratedLessonPlan, LessonPlan, LessonRequest, Source, Verdict,
};
use crate::util::{fill_template, is_blank, trunc_for_log};

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
  pub prompts: Prompts,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(prompts: Prompts, timeout: Duration) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !is_blank(k))?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let fast_model =
      std::env::var("OPENAI_FAST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let strong_model =
      std::env::var("OPENAI_STRONG_MODEL").unwrap_or_else(|_| "gpt-4o".into());

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, fast_model, strong_model, prompts })
  }

  async fn send(&self, req: &ChatCompletionRequest) -> Result<String, AiError> {
    let url = format!("{}/chat/completions", self.base_url);
    let res = self.client.post(&url)
      .header(USER_AGENT, "fled-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(req).send().await.map_err(|e| AiError::Transport(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(AiError::Http { status: status.as_u16(), message });
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| AiError::Parse(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();
    if is_blank(&text) {
      return Err(AiError::EmptyResponse);
    }
    Ok(text)
  }

  /// Plain-text chat completion. Used for topics and grading.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_plain(
    &self,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
    max_tokens: Option<u32>,
  ) -> Result<String, AiError> {
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: None,
      max_tokens,
    };
    Ok(self.send(&req).await?.trim().to_string())
  }

  /// JSON-object chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_json<T: for<'a> Deserialize<'a>>(
    &self,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<T, AiError> {
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };
    let text = self.send(&req).await?;
    serde_json::from_str::<T>(&text).map_err(|e| AiError::Parse(format!("JSON parse error: {}", e)))
  }
}

#[async_trait]
impl LessonAi for OpenAI {
  #[instrument(level = "info", skip(self, req), fields(level = %req.cefr_level, length = req.passage_length, model = %self.strong_model))]
  async fn generate_lesson_plan(&self, req: &LessonRequest) -> Result<LessonPlan, AiError> {
    let user = build_lesson_prompt(&self.prompts, req);
    let start = Instant::now();
    let result = self
      .chat_json::<GeneratedLessonPlan>(&self.strong_model, &self.prompts.lesson_system, &user, 0.7)
      .await;
    let elapsed = start.elapsed();

    let raw = match result {
      Ok(raw) => {
        info!(?elapsed, "Model response received successfully");
        raw
      }
      Err(e) => {
        error!(?elapsed, error = %e, "Model call failed during lesson generation");
        return Err(e);
      }
    };

    let plan = raw
      .into_lesson_plan(req)
      .ok_or_else(|| AiError::Parse("lesson plan has no reading passage".into()))?;
    info!(
      title = %trunc_for_log(&plan.title, 40),
      questions = plan.comprehension_questions.len(),
      vocabulary = plan.key_vocabulary.len(),
      "Lesson plan successfully generated"
    );
    Ok(plan)
  }

  #[instrument(level = "info", skip(self), fields(%part, model = %self.strong_model))]
  async fn generate_exam_section(&self, part: ExamPart) -> Result<ExamSection, AiError> {
    let user = match part {
      ExamPart::Reading1 => &self.prompts.exam_reading1_template,
      ExamPart::Reading2 => &self.prompts.exam_reading2_template,
    };
    let start = Instant::now();
    let section: ExamSection = self.chat_json(&self.strong_model, &self.prompts.exam_system, user, 0.6).await?;
    let section = section.sanitized();
    info!(elapsed = ?start.elapsed(), questions = section.questions.len(), "Exam section generated");
    if section.questions.is_empty() || is_blank(&section.passage) {
      return Err(AiError::Parse("exam section has no usable questions".into()));
    }
    Ok(section)
  }

  #[instrument(level = "info", skip(self), fields(model = %self.fast_model))]
  async fn random_topic(&self) -> Result<String, AiError> {
    let text = self
      .chat_plain(&self.fast_model, &self.prompts.topic_system, "Give me one topic.", 1.0, Some(40))
      .await?;
    clean_topic(&text).ok_or(AiError::EmptyResponse)
  }

  #[instrument(level = "info", skip(self, passage), fields(passage_len = passage.len(), model = %self.fast_model))]
  async fn find_sources(&self, passage: &str) -> Result<Vec<Source>, AiError> {
    #[derive(Deserialize)]
    struct Found { #[serde(default)] sources: Vec<Source> }

    let user = fill_template(&self.prompts.sources_user_template, &[("passage", passage)]);
    let found: Found = self.chat_json(&self.fast_model, &self.prompts.sources_system, &user, 0.2).await?;
    Ok(dedupe_sources(found.sources))
  }

  #[instrument(level = "info", skip_all, fields(answer_len = answer.len(), model = %self.fast_model))]
  async fn judge_answer(&self, question: &str, expected: &str, answer: &str) -> Result<Verdict, AiError> {
    let user = fill_template(
      &self.prompts.grading_user_template,
      &[("question", question), ("expected", expected), ("answer", answer)],
    );
    let text = self.chat_plain(&self.fast_model, &self.prompts.grading_system, &user, 0.1, Some(5)).await?;
    parse_verdict(&text).ok_or_else(|| AiError::Parse(format!("unexpected verdict '{}'", trunc_for_log(&text, 20))))
  }
}

/// Paragraph structure expected for a passage of the given length.
fn structure_instruction(passage_length: u32) -> &'static str {
  match passage_length {
    0..=300 => "Structure: an introduction, 1-2 body paragraphs and a conclusion, separated by blank lines.",
    301..=600 => "Structure: an introduction, 2-3 body paragraphs and a conclusion, separated by blank lines.",
    _ => "Structure: an introduction, at least 3-4 well-developed body paragraphs and a conclusion, separated by blank lines.",
  }
}

/// Render the lesson-plan user prompt. Optional designer fields only appear when set.
pub fn build_lesson_prompt(prompts: &Prompts, req: &LessonRequest) -> String {
  let mut extras = String::new();
  if !is_blank(&req.custom_vocabulary) {
    extras.push_str(&format!(
      "Required vocabulary (weave naturally into the passage, mention it in the rationale): \"{}\"\n",
      req.custom_vocabulary.trim()
    ));
  }
  if !is_blank(&req.pedagogical_focus) {
    extras.push_str(&format!(
      "Core pedagogical focus (the rationale must explain how it is addressed): \"{}\"\n",
      req.pedagogical_focus.trim()
    ));
  }
  if !is_blank(&req.exemplar_passage) {
    extras.push_str(&format!("Style exemplar, emulate tone and sentence structure: \"{}\"\n", req.exemplar_passage.trim()));
  }
  if !is_blank(&req.exemplar_questions) {
    extras.push_str(&format!("Question style exemplars: \"{}\"\n", req.exemplar_questions.trim()));
  }
  if !is_blank(&req.advanced_instructions) {
    extras.push_str(&format!("Additional instructions: {}\n", req.advanced_instructions.trim()));
  }

  let length = req.passage_length.to_string();
  let count = req.effective_question_count().to_string();
  fill_template(
    &prompts.lesson_user_template,
    &[
      ("topic", req.topic.trim()),
      ("level", req.cefr_level.as_str()),
      ("length", &length),
      ("question_count", &count),
      ("structure", structure_instruction(req.passage_length)),
      ("extras", &extras),
    ],
  )
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::CefrLevel;

  #[test]
  fn lesson_prompt_includes_only_filled_fields() {
    let req = LessonRequest {
      topic: "Volcanoes".into(),
      cefr_level: CefrLevel::B1,
      passage_length: 500,
      custom_vocabulary: "erupt, magma".into(),
      number_of_questions: 20,
      ..Default::default()
    };
    let p = build_lesson_prompt(&Prompts::default(), &req);
    assert!(p.contains("Topic: \"Volcanoes\""));
    assert!(p.contains("Target CEFR level: B1"));
    assert!(p.contains("about 500 words"));
    assert!(p.contains("exactly 9"));
    assert!(p.contains("erupt, magma"));
    assert!(p.contains("2-3 body paragraphs"));
    assert!(!p.contains("Style exemplar"));
    assert!(!p.contains("{extras}"));
  }

  #[test]
  fn provider_error_message_is_extracted() {
    let body = r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#;
    assert_eq!(extract_openai_error(body).as_deref(), Some("Rate limit reached"));
    assert_eq!(extract_openai_error("<html>"), None);
  }
}
