//! Loading service configuration (prompts, credit limits, timings, storage) from TOML.
//!
//! See `AgentConfig` for the expected schema. Every section is optional and
//! falls back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file: {0}")]
  Read(#[from] std::io::Error),
  #[error("failed to parse TOML config: {0}")]
  Parse(#[from] toml::de::Error),
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub credits: CreditsCfg,
  #[serde(default)]
  pub timing: TimingCfg,
  #[serde(default)]
  pub storage: StorageCfg,
}

/// Quota settings for both credit systems.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CreditsCfg {
  // simple: one shared daily pool
  pub daily_limit: u32,
  pub lesson_plan_cost: u32,
  pub exam_cost: u32,
  // complex: per-operation quotas
  pub lesson_plan_daily_limit: u32,
  pub exam_cooldown_hours: i64,
}

impl Default for CreditsCfg {
  fn default() -> Self {
    Self {
      daily_limit: 5,
      lesson_plan_cost: 2,
      exam_cost: 1,
      lesson_plan_daily_limit: 2,
      exam_cooldown_hours: 72,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TimingCfg {
  pub autosave_debounce_ms: u64,
  pub loading_tick_ms: u64,
  pub lesson_test_minutes: u64,
  pub reading1_minutes: u64,
  pub reading2_minutes: u64,
  pub ai_timeout_secs: u64,
}

impl Default for TimingCfg {
  fn default() -> Self {
    Self {
      autosave_debounce_ms: 1500,
      loading_tick_ms: 2500,
      lesson_test_minutes: 15,
      reading1_minutes: 45,
      reading2_minutes: 50,
      ai_timeout_secs: 120,
    }
  }
}

impl TimingCfg {
  pub fn autosave_debounce(&self) -> Duration { Duration::from_millis(self.autosave_debounce_ms) }
  pub fn loading_tick(&self) -> Duration { Duration::from_millis(self.loading_tick_ms.max(1)) }
  pub fn ai_timeout(&self) -> Duration { Duration::from_secs(self.ai_timeout_secs) }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageCfg {
  pub data_dir: PathBuf,
}

impl Default for StorageCfg {
  fn default() -> Self {
    Self { data_dir: PathBuf::from("./data") }
  }
}

/// Prompts used by the OpenAI client. Override them in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  // Lesson plan
  pub lesson_system: String,
  pub lesson_user_template: String,
  // Practice exam sections
  pub exam_system: String,
  pub exam_reading1_template: String,
  pub exam_reading2_template: String,
  // Helpers
  pub topic_system: String,
  pub sources_system: String,
  pub sources_user_template: String,
  pub grading_system: String,
  pub grading_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      lesson_system: "You design EFL/ESL reading lessons calibrated to CEFR levels. Respond ONLY with strict JSON.".into(),
      lesson_user_template: concat!(
        "Create a reading lesson plan.\n",
        "Topic: \"{topic}\"\nTarget CEFR level: {level}\nPassage length: about {length} words.\n",
        "{extras}",
        "Passage: an engaging, narrative-driven text where the topic is central. {structure} ",
        "Grammar, vocabulary and sentence length must suit a {level} learner.\n",
        "Vocabulary: 5-7 Tier 2 words from the passage, each with partOfSpeech, a simple definition and a new exampleSentence.\n",
        "Questions: exactly {question_count}, a balanced mix of 'true-false' (answer \"True\" or \"False\"), ",
        "'multiple-choice' (four options, answer is one of them) and 'short-answer' (concise answer from the text).\n",
        "Rationale: 2-4 sentences on why the text and tasks suit {level}.\n",
        "Return JSON: {\"title\": string, \"cefrLevel\": string, \"pedagogicalRationale\": string, \"readingPassage\": string, ",
        "\"keyVocabulary\": [{\"word\", \"partOfSpeech\", \"definition\", \"exampleSentence\"}], ",
        "\"comprehensionQuestions\": [{\"question\", \"type\", \"answer\", \"options\"?}], \"writingPrompts\": [string]}"
      ).into(),
      exam_system: concat!(
        "You write one BUEPT-style university reading section for B1-B2 preparatory students. ",
        "The passage is 1800-2000 words and every paragraph starts with a marker [P1], [P2], ... ",
        "Respond ONLY with strict JSON: {\"title\": string, \"passage\": string, \"questions\": [{\"questionNumber\": int, ",
        "\"questionText\": string, \"type\": string, \"paragraphReference\": string, \"options\"?: [string], \"answer\": string}], ",
        "\"sourceCredit\"?: string}. Open-ended questions have no options."
      ).into(),
      exam_reading1_template: concat!(
        "Section: literal reading. Pick an engaging general-interest topic (history, social science, technology). ",
        "Write between 10 and 13 questions that follow paragraph order: vocabulary-in-context, primary-purpose, ",
        "sentence-completion (open-ended), main-idea, not-mentioned, paragraph-relationship, insert-sentence (options A-D), ",
        "cross-textual-inference and global-inference-negative."
      ).into(),
      exam_reading2_template: concat!(
        "Section: inference reading. The passage reads like an academic paper (psychology, sociology, linguistics or ",
        "environmental science) in 13-17 paragraphs; give a plausible citation in sourceCredit. Write exactly 12 questions: ",
        "phrase-in-context, case-application, authors-purpose, term-application (open-ended), author-personification, ",
        "study-prediction, research-results (open-ended), case-matching, research-mindset (open-ended), then three ",
        "paragraph-matching questions whose answer is a marker such as \"[P5]\"."
      ).into(),
      topic_system: concat!(
        "You suggest one fresh, unexpected topic phrase for an EFL/ESL reading passage. ",
        "Be absurd, trendy, philosophical or nostalgic at random. Output ONLY the phrase, no quotes, no explanation."
      ).into(),
      sources_system: "You find authoritative web sources related to a text. Respond ONLY with strict JSON.".into(),
      sources_user_template: "Text: \"{passage}\"\nReturn JSON {\"sources\": [{\"uri\": string, \"title\": string}]} with the 3-5 most relevant pages.".into(),
      grading_system: "You grade short English exam answers by meaning, not wording. Reply with exactly one word: Correct or Incorrect.".into(),
      grading_user_template: "Question: \"{question}\"\nCorrect answer: \"{expected}\"\nStudent answer: \"{answer}\"".into(),
    }
  }
}

/// Parse a TOML document into an `AgentConfig`.
pub fn parse_agent_config(s: &str) -> Result<AgentConfig, ConfigError> {
  Ok(toml::from_str::<AgentConfig>(s)?)
}

pub fn load_agent_config(path: &Path) -> Result<AgentConfig, ConfigError> {
  let s = std::fs::read_to_string(path)?;
  parse_agent_config(&s)
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match load_agent_config(Path::new(&path)) {
    Ok(cfg) => {
      info!(target: "fled_backend", %path, "Loaded agent config (TOML)");
      Some(cfg)
    }
    Err(e) => {
      error!(target: "fled_backend", %path, error = %e, "Failed to load TOML config");
      None
    }
  }
}

/// Process-level switches read from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
  pub port: u16,
  /// Bypasses all credit arithmetic. Lives only as long as the process.
  pub dev_mode: bool,
  pub data_dir: PathBuf,
}

impl Settings {
  pub fn from_env(cfg: &AgentConfig) -> Self {
    let port = std::env::var("PORT")
      .ok()
      .and_then(|p| p.parse::<u16>().ok())
      .unwrap_or(3000);
    let dev_mode = std::env::var("FLED_DEV_MODE")
      .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
      .unwrap_or(false);
    let data_dir = std::env::var("FLED_DATA_DIR")
      .map(PathBuf::from)
      .unwrap_or_else(|_| cfg.storage.data_dir.clone());
    Self { port, dev_mode, data_dir }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_toml_keeps_defaults() {
    let cfg = parse_agent_config(
      r#"
      [credits]
      daily_limit = 9

      [timing]
      autosave_debounce_ms = 500

      [prompts]
      topic_system = "Only animals."
      "#,
    )
    .unwrap();
    assert_eq!(cfg.credits.daily_limit, 9);
    assert_eq!(cfg.credits.lesson_plan_cost, 2);
    assert_eq!(cfg.timing.autosave_debounce(), Duration::from_millis(500));
    assert_eq!(cfg.timing.lesson_test_minutes, 15);
    assert_eq!(cfg.prompts.topic_system, "Only animals.");
    assert!(!cfg.prompts.grading_system.is_empty());
  }

  #[test]
  fn invalid_toml_is_an_error() {
    assert!(matches!(parse_agent_config("credits = ["), Err(ConfigError::Parse(_))));
  }

  #[test]
  fn empty_document_is_all_defaults() {
    let cfg = parse_agent_config("").unwrap();
    assert_eq!(cfg.credits.exam_cooldown_hours, 72);
    assert_eq!(cfg.storage.data_dir, PathBuf::from("./data"));
  }
}
