//! Domain models: lesson plans, exam sections, sources, form drafts and verdicts.
//!
//! Field names serialize in camelCase so saved lessons and drafts stay
//! readable by the browser front-end.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::util::{is_blank, normalize_answer, word_count};

/// Allowed drift of the generated passage length around the requested word count.
pub const PASSAGE_LENGTH_TOLERANCE: f64 = 0.35;

/// CEFR proficiency tier with the sub-gradations the designer offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CefrLevel {
  #[serde(rename = "A1")] A1,
  #[serde(rename = "A1+")] A1Plus,
  #[serde(rename = "A2-")] A2Minus,
  #[serde(rename = "A2")] A2,
  #[serde(rename = "A2+")] A2Plus,
  #[serde(rename = "B1-")] B1Minus,
  #[serde(rename = "B1")] B1,
  #[serde(rename = "B1+")] B1Plus,
  #[serde(rename = "B2-")] B2Minus,
  #[serde(rename = "B2")] B2,
  #[serde(rename = "B2+")] B2Plus,
}

impl CefrLevel {
  pub const ALL: [CefrLevel; 11] = [
    CefrLevel::A1, CefrLevel::A1Plus,
    CefrLevel::A2Minus, CefrLevel::A2, CefrLevel::A2Plus,
    CefrLevel::B1Minus, CefrLevel::B1, CefrLevel::B1Plus,
    CefrLevel::B2Minus, CefrLevel::B2, CefrLevel::B2Plus,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      CefrLevel::A1 => "A1",
      CefrLevel::A1Plus => "A1+",
      CefrLevel::A2Minus => "A2-",
      CefrLevel::A2 => "A2",
      CefrLevel::A2Plus => "A2+",
      CefrLevel::B1Minus => "B1-",
      CefrLevel::B1 => "B1",
      CefrLevel::B1Plus => "B1+",
      CefrLevel::B2Minus => "B2-",
      CefrLevel::B2 => "B2",
      CefrLevel::B2Plus => "B2+",
    }
  }
}

impl Default for CefrLevel {
  fn default() -> Self { CefrLevel::B1 }
}

impl fmt::Display for CefrLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CefrLevel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    CefrLevel::ALL
      .iter()
      .copied()
      .find(|l| l.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| format!("unknown CEFR level '{}'", s))
  }
}

/// Comprehension question kinds, in presentation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
  TrueFalse,
  MultipleChoice,
  ShortAnswer,
}

impl QuestionType {
  pub fn rank(&self) -> u8 {
    match self {
      QuestionType::TrueFalse => 0,
      QuestionType::MultipleChoice => 1,
      QuestionType::ShortAnswer => 2,
    }
  }

  /// Lenient parse of the tag a model returns.
  pub fn parse_loose(s: &str) -> Option<Self> {
    let s = s.trim().to_lowercase().replace(['_', ' ', '/'], "-");
    match s.as_str() {
      "true-false" | "truefalse" | "tf" => Some(QuestionType::TrueFalse),
      "multiple-choice" | "multiplechoice" | "mcq" => Some(QuestionType::MultipleChoice),
      "short-answer" | "shortanswer" | "open-ended" => Some(QuestionType::ShortAnswer),
      _ => None,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyWord {
  pub word: String,
  #[serde(default)] pub part_of_speech: String,
  #[serde(default)] pub definition: String,
  #[serde(default)] pub example_sentence: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComprehensionQuestion {
  pub question: String,
  #[serde(rename = "type")]
  pub kind: QuestionType,
  pub answer: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<String>>,
}

/// Generated lesson plan. Never mutated once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPlan {
  pub title: String,
  pub cefr_level: CefrLevel,
  pub pedagogical_rationale: String,
  pub reading_passage: String,
  pub key_vocabulary: Vec<VocabularyWord>,
  pub comprehension_questions: Vec<ComprehensionQuestion>,
  #[serde(default)]
  pub writing_prompts: Vec<String>,
}

/// A citation found for a passage.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
  pub uri: String,
  pub title: String,
}

/// Keep the first occurrence of every URI, dropping blanks.
pub fn dedupe_sources(sources: Vec<Source>) -> Vec<Source> {
  let mut seen = std::collections::HashSet::new();
  sources
    .into_iter()
    .filter(|s| !is_blank(&s.uri))
    .filter(|s| seen.insert(s.uri.trim().to_string()))
    .collect()
}

/// All designer-mode input fields. Doubles as the autosave draft.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LessonRequest {
  pub topic: String,
  pub cefr_level: CefrLevel,
  pub passage_length: u32,
  pub advanced_instructions: String,
  pub exemplar_passage: String,
  pub exemplar_questions: String,
  pub pedagogical_focus: String,
  pub custom_vocabulary: String,
  pub number_of_questions: u32,
}

impl Default for LessonRequest {
  fn default() -> Self {
    Self {
      topic: String::new(),
      cefr_level: CefrLevel::B1,
      passage_length: 500,
      advanced_instructions: String::new(),
      exemplar_passage: String::new(),
      exemplar_questions: String::new(),
      pedagogical_focus: String::new(),
      custom_vocabulary: String::new(),
      number_of_questions: 6,
    }
  }
}

impl LessonRequest {
  /// True if any free-text field holds something worth keeping.
  pub fn has_content(&self) -> bool {
    [
      &self.topic,
      &self.advanced_instructions,
      &self.exemplar_passage,
      &self.exemplar_questions,
      &self.pedagogical_focus,
      &self.custom_vocabulary,
    ]
    .iter()
    .any(|f| !is_blank(f))
  }

  /// Question count actually requested, capped by the passage length band.
  pub fn effective_question_count(&self) -> u32 {
    self.number_of_questions.clamp(1, max_questions_for(self.passage_length))
  }
}

/// Longer passages support more questions.
pub fn max_questions_for(passage_length: u32) -> u32 {
  match passage_length {
    0..=300 => 6,
    301..=600 => 9,
    601..=800 => 12,
    _ => 15,
  }
}

/// Shape returned by the model before validation. Everything is optional so a
/// single malformed question does not sink the whole plan.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratedLessonPlan {
  pub title: String,
  pub cefr_level: Option<String>,
  pub pedagogical_rationale: String,
  pub reading_passage: String,
  pub key_vocabulary: Vec<VocabularyWord>,
  pub comprehension_questions: Vec<GeneratedQuestion>,
  pub writing_prompts: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GeneratedQuestion {
  pub question: Option<String>,
  #[serde(rename = "type")]
  pub kind: Option<String>,
  pub answer: Option<String>,
  pub options: Option<Vec<String>>,
}

impl GeneratedQuestion {
  /// Validate against the question-type invariants, repairing answer casing.
  pub fn into_question(self) -> Option<ComprehensionQuestion> {
    let question = self.question.filter(|q| !is_blank(q))?;
    let kind = QuestionType::parse_loose(self.kind.as_deref()?)?;
    let answer = self.answer.filter(|a| !is_blank(a))?;

    match kind {
      QuestionType::TrueFalse => {
        let answer = match normalize_answer(&answer).as_str() {
          "true" => "True",
          "false" => "False",
          _ => return None,
        };
        Some(ComprehensionQuestion { question, kind, answer: answer.into(), options: None })
      }
      QuestionType::MultipleChoice => {
        let options: Vec<String> = self
          .options?
          .into_iter()
          .filter(|o| !is_blank(o))
          .collect();
        let wanted = normalize_answer(&answer);
        let canonical = options.iter().find(|o| normalize_answer(o) == wanted)?.clone();
        Some(ComprehensionQuestion { question, kind, answer: canonical, options: Some(options) })
      }
      QuestionType::ShortAnswer => {
        Some(ComprehensionQuestion { question, kind, answer: answer.trim().to_string(), options: None })
      }
    }
  }
}

impl GeneratedLessonPlan {
  /// Turn the raw model output into a plan honoring the request.
  /// Returns `None` when nothing usable came back.
  pub fn into_lesson_plan(self, req: &LessonRequest) -> Option<LessonPlan> {
    if is_blank(&self.reading_passage) {
      return None;
    }
    let received = self.comprehension_questions.len();
    let mut questions: Vec<ComprehensionQuestion> = self
      .comprehension_questions
      .into_iter()
      .filter_map(GeneratedQuestion::into_question)
      .collect();
    if questions.len() < received {
      warn!(target: "lesson", received, kept = questions.len(), "Dropped malformed comprehension questions");
    }
    questions.sort_by_key(|q| q.kind.rank());
    questions.truncate(req.effective_question_count() as usize);

    if let Some(level) = self.cefr_level.as_deref() {
      if level.parse::<CefrLevel>().ok() != Some(req.cefr_level) {
        warn!(target: "lesson", returned = %level, requested = %req.cefr_level, "Model reported a different CEFR level; keeping requested");
      }
    }

    let words = word_count(&self.reading_passage);
    if !passage_within_tolerance(words, req.passage_length) {
      warn!(target: "lesson", words, requested = req.passage_length, "Passage length outside tolerance");
    }

    Some(LessonPlan {
      title: self.title.trim().to_string(),
      cefr_level: req.cefr_level,
      pedagogical_rationale: self.pedagogical_rationale.trim().to_string(),
      reading_passage: self.reading_passage.trim().to_string(),
      key_vocabulary: self.key_vocabulary.into_iter().filter(|v| !is_blank(&v.word)).collect(),
      comprehension_questions: questions,
      writing_prompts: self.writing_prompts.into_iter().filter(|p| !is_blank(p)).collect(),
    })
  }
}

pub fn passage_within_tolerance(words: usize, target: u32) -> bool {
  let target = target as f64;
  let delta = (words as f64 - target).abs();
  delta <= target * PASSAGE_LENGTH_TOLERANCE
}

/// The two practice-exam reading sections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamPart {
  Reading1,
  Reading2,
}

impl ExamPart {
  pub fn title(&self) -> &'static str {
    match self {
      ExamPart::Reading1 => "Reading 1: Literal Comprehension",
      ExamPart::Reading2 => "Reading 2: Inference & Academic Reading",
    }
  }
}

impl fmt::Display for ExamPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExamPart::Reading1 => f.write_str("reading1"),
      ExamPart::Reading2 => f.write_str("reading2"),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamQuestion {
  pub question_number: u32,
  pub question_text: String,
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub paragraph_reference: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<String>>,
  pub answer: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSection {
  pub title: String,
  pub passage: String,
  pub questions: Vec<ExamQuestion>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_credit: Option<String>,
}

impl ExamSection {
  /// Drop unusable questions and keep numbering unique and ascending.
  pub fn sanitized(mut self) -> Self {
    self.questions.retain(|q| !is_blank(&q.question_text) && !is_blank(&q.answer));
    for q in self.questions.iter_mut() {
      if let Some(opts) = &q.options {
        if opts.is_empty() {
          q.options = None;
        }
      }
    }
    self.questions.sort_by_key(|q| q.question_number);
    self.questions.dedup_by_key(|q| q.question_number);
    self
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
  Correct,
  Incorrect,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
  pub result: Verdict,
  pub correct_answer: String,
  pub user_answer: String,
}

/// 1-based question ordinal → answer text.
pub type UserAnswers = BTreeMap<u32, String>;

/// 1-based question ordinal → verdict.
pub type GradingResults = BTreeMap<u32, GradingResult>;

#[cfg(test)]
mod tests {
  use super::*;

  fn raw_q(q: &str, kind: &str, answer: &str, options: Option<&[&str]>) -> GeneratedQuestion {
    GeneratedQuestion {
      question: Some(q.into()),
      kind: Some(kind.into()),
      answer: Some(answer.into()),
      options: options.map(|o| o.iter().map(|s| s.to_string()).collect()),
    }
  }

  #[test]
  fn cefr_levels_round_trip_through_strings() {
    assert_eq!("b1+".parse::<CefrLevel>().unwrap(), CefrLevel::B1Plus);
    assert_eq!(serde_json::to_string(&CefrLevel::A2Minus).unwrap(), "\"A2-\"");
    assert!("C1".parse::<CefrLevel>().is_err());
  }

  #[test]
  fn question_invariants_are_enforced() {
    assert_eq!(raw_q("Sky is blue", "true-false", "true", None).into_question().unwrap().answer, "True");
    assert!(raw_q("Sky is blue", "true-false", "maybe", None).into_question().is_none());

    let mc = raw_q("Pick", "multiple-choice", "paris ", Some(&["Paris", "Rome"])).into_question().unwrap();
    assert_eq!(mc.answer, "Paris");
    assert!(raw_q("Pick", "multiple-choice", "Oslo", Some(&["Paris", "Rome"])).into_question().is_none());
    assert!(raw_q("Pick", "multiple-choice", "Paris", None).into_question().is_none());
    assert!(raw_q("Why?", "essay", "x", None).into_question().is_none());
  }

  #[test]
  fn generated_plan_is_ordered_and_truncated() {
    let req = LessonRequest { topic: "Volcanoes".into(), number_of_questions: 3, ..Default::default() };
    let raw = GeneratedLessonPlan {
      title: " Fire Mountains ".into(),
      cefr_level: Some("B1".into()),
      reading_passage: "word ".repeat(500),
      comprehension_questions: vec![
        raw_q("Why?", "short-answer", "Heat", None),
        raw_q("Pick", "multiple-choice", "Lava", Some(&["Lava", "Ice"])),
        raw_q("Hot?", "true-false", "True", None),
        raw_q("Extra?", "true-false", "False", None),
        GeneratedQuestion::default(),
      ],
      ..Default::default()
    };
    let plan = raw.into_lesson_plan(&req).unwrap();
    assert_eq!(plan.title, "Fire Mountains");
    let kinds: Vec<_> = plan.comprehension_questions.iter().map(|q| q.kind).collect();
    assert_eq!(kinds, vec![QuestionType::TrueFalse, QuestionType::TrueFalse, QuestionType::MultipleChoice]);
  }

  #[test]
  fn blank_passage_is_rejected() {
    assert!(GeneratedLessonPlan::default().into_lesson_plan(&LessonRequest::default()).is_none());
  }

  #[test]
  fn question_cap_follows_passage_bands() {
    assert_eq!(max_questions_for(250), 6);
    assert_eq!(max_questions_for(500), 9);
    assert_eq!(max_questions_for(750), 12);
    assert_eq!(max_questions_for(1000), 15);
    let req = LessonRequest { passage_length: 250, number_of_questions: 12, ..Default::default() };
    assert_eq!(req.effective_question_count(), 6);
  }

  #[test]
  fn draft_content_detection() {
    let mut req = LessonRequest::default();
    assert!(!req.has_content());
    req.custom_vocabulary = "erupt".into();
    assert!(req.has_content());
  }

  #[test]
  fn lesson_plan_uses_camel_case_wire_names() {
    let json = r#"{"title":"T","cefrLevel":"B1","pedagogicalRationale":"R","readingPassage":"P",
      "keyVocabulary":[],"comprehensionQuestions":[{"question":"Q","type":"true-false","answer":"True"}]}"#;
    let plan: LessonPlan = serde_json::from_str(json).unwrap();
    assert_eq!(plan.comprehension_questions[0].kind, QuestionType::TrueFalse);
    assert!(plan.writing_prompts.is_empty());
  }

  #[test]
  fn sources_dedupe_by_uri() {
    let s = |u: &str, t: &str| Source { uri: u.into(), title: t.into() };
    let out = dedupe_sources(vec![s("a", "1"), s("b", "2"), s("a", "3"), s(" ", "4")]);
    assert_eq!(out, vec![s("a", "1"), s("b", "2")]);
  }

  #[test]
  fn exam_section_sanitation_orders_questions() {
    let q = |n: u32, text: &str| ExamQuestion {
      question_number: n,
      question_text: text.into(),
      kind: "main-idea".into(),
      paragraph_reference: "[P1]".into(),
      options: Some(vec![]),
      answer: "A".into(),
    };
    let s = ExamSection { title: "T".into(), passage: "P".into(), questions: vec![q(2, "b"), q(1, "a"), q(3, " ")], source_credit: None }.sanitized();
    assert_eq!(s.questions.iter().map(|q| q.question_number).collect::<Vec<_>>(), vec![1, 2]);
    assert!(s.questions[0].options.is_none());
  }
}
