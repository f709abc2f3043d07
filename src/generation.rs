//! Generation orchestrator.
//!
//! One primary generation at a time: validate, gate on credits, call the AI
//! capability, then commit (charge credits, prepend to history, clear the
//! draft). Source lookup for the new passage runs afterwards in its own task
//! and lands on the history entry by id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

use crate::ai::{with_timeout, LessonAi};
use crate::autosave::DraftAutosave;
use crate::clock::Clock;
use crate::config::TimingCfg;
use crate::credits::{CreditLedger, OperationKind};
use crate::domain::{ExamPart, ExamSection, LessonPlan, LessonRequest, Source};
use crate::history::{EntryId, HistoryStore};
use crate::seeds::{random_seed_topic, LOADING_MESSAGES};
use crate::store::{load_json, save_json, KvStore, KEY_SAVED_LESSON};
use crate::util::{is_blank, trunc_for_log};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
  #[error("{0}")]
  Validation(String),
  #[error("{0}")]
  QuotaExceeded(String),
  #[error("a generation is already in progress")]
  Busy,
  #[error("{0}")]
  Failed(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GenerationStatus {
  Idle,
  Loading { operation: OperationKind, message: String },
  Failed { error: String },
}

/// Result of a committed lesson generation. `enrichment` finishes once the
/// source lookup has been merged into the entry.
#[derive(Debug)]
pub struct Generated {
  pub entry_id: EntryId,
  pub plan: LessonPlan,
  pub enrichment: JoinHandle<()>,
}

/// Form parameters plus the result, as written under the saved-lesson key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedLesson {
  #[serde(flatten)]
  pub params: LessonRequest,
  pub lesson_plan: LessonPlan,
  #[serde(default)]
  pub sources: Option<Vec<Source>>,
}

pub struct GenerationOrchestrator {
  ai: Arc<dyn LessonAi>,
  ledger: Arc<Mutex<CreditLedger>>,
  history: Arc<RwLock<HistoryStore>>,
  autosave: Arc<DraftAutosave>,
  store: Arc<dyn KvStore>,
  clock: Arc<dyn Clock>,
  timing: TimingCfg,
  status: Arc<StdMutex<GenerationStatus>>,
  in_flight: Arc<AtomicBool>,
  current_exam: RwLock<Option<(ExamPart, ExamSection)>>,
}

/// Holds the in-flight slot and, once loading has started, the message
/// ticker. Dropping it releases the slot; a status still showing `Loading`
/// at that point belongs to an interrupted run and is marked failed.
struct LoadingGuard {
  status: Arc<StdMutex<GenerationStatus>>,
  in_flight: Arc<AtomicBool>,
  ticker: Option<JoinHandle<()>>,
}

impl LoadingGuard {
  fn start(&mut self, operation: OperationKind, tick: Duration) {
    *self.status.lock().unwrap_or_else(|e| e.into_inner()) =
      GenerationStatus::Loading { operation, message: LOADING_MESSAGES[0].to_string() };

    let status = Arc::clone(&self.status);
    self.ticker = Some(tokio::spawn(async move {
      let mut step = 0usize;
      loop {
        tokio::time::sleep(tick).await;
        step = (step + 1) % LOADING_MESSAGES.len();
        let mut s = status.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *s {
          GenerationStatus::Loading { message, .. } => *message = LOADING_MESSAGES[step].to_string(),
          _ => break,
        }
      }
    }));
  }
}

impl Drop for LoadingGuard {
  fn drop(&mut self) {
    if let Some(ticker) = self.ticker.take() {
      ticker.abort();
      let mut s = self.status.lock().unwrap_or_else(|e| e.into_inner());
      if matches!(*s, GenerationStatus::Loading { .. }) {
        warn!(target: "lesson", "Generation interrupted while loading");
        *s = GenerationStatus::Failed { error: INTERRUPTED.to_string() };
      }
    }
    self.in_flight.store(false, Ordering::SeqCst);
  }
}

const INTERRUPTED: &str = "The generation was interrupted before it finished. Please try again.";

impl GenerationOrchestrator {
  pub fn new(
    ai: Arc<dyn LessonAi>,
    ledger: Arc<Mutex<CreditLedger>>,
    history: Arc<RwLock<HistoryStore>>,
    autosave: Arc<DraftAutosave>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    timing: TimingCfg,
  ) -> Self {
    Self {
      ai,
      ledger,
      history,
      autosave,
      store,
      clock,
      timing,
      status: Arc::new(StdMutex::new(GenerationStatus::Idle)),
      in_flight: Arc::new(AtomicBool::new(false)),
      current_exam: RwLock::new(None),
    }
  }

  pub fn status(&self) -> GenerationStatus {
    self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn is_in_flight(&self) -> bool {
    self.in_flight.load(Ordering::SeqCst)
  }

  pub fn history(&self) -> &Arc<RwLock<HistoryStore>> {
    &self.history
  }

  pub async fn current_exam(&self) -> Option<(ExamPart, ExamSection)> {
    self.current_exam.read().await.clone()
  }

  fn set_status(&self, status: GenerationStatus) {
    *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
  }

  async fn gate(&self, kind: OperationKind) -> Result<(), GenerationError> {
    self.ledger.lock().await.check(kind).map_err(|msg| {
      info!(target: "credits", ?kind, %msg, "Generation refused at the credit gate");
      GenerationError::QuotaExceeded(msg)
    })
  }

  /// Claim the single in-flight slot. Loading has not started yet; a refusal
  /// after this point leaves the status untouched.
  fn claim(&self) -> Result<LoadingGuard, GenerationError> {
    if self.in_flight.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
      return Err(GenerationError::Busy);
    }
    Ok(LoadingGuard { status: Arc::clone(&self.status), in_flight: Arc::clone(&self.in_flight), ticker: None })
  }

  /// Run `job` on its own task so a caller that goes away mid-call cannot
  /// split the charge from the commit.
  async fn detached<T, F>(self: &Arc<Self>, job: impl FnOnce(Arc<Self>) -> F) -> Result<T, GenerationError>
  where
    T: Send + 'static,
    F: std::future::Future<Output = Result<T, GenerationError>> + Send + 'static,
  {
    tokio::spawn(job(Arc::clone(self)).instrument(Span::current())).await.unwrap_or_else(|e| {
      error!(target: "lesson", error = %e, "Generation task did not complete");
      Err(GenerationError::Failed(format!("The generation task stopped unexpectedly. Details: {}", e)))
    })
  }

  /// Generate a lesson plan for the designer parameters.
  #[instrument(level = "info", skip(self, req), fields(topic = %trunc_for_log(&req.topic, 60), level = %req.cefr_level))]
  pub async fn generate_lesson(self: &Arc<Self>, req: LessonRequest) -> Result<Generated, GenerationError> {
    if is_blank(&req.topic) {
      return Err(GenerationError::Validation("Please enter a topic to generate a lesson plan.".into()));
    }
    self.detached(move |this| async move { this.run_lesson(req).await }).await
  }

  async fn run_lesson(&self, req: LessonRequest) -> Result<Generated, GenerationError> {
    let mut guard = self.claim()?;
    self.gate(OperationKind::LessonPlan).await?;
    guard.start(OperationKind::LessonPlan, self.timing.loading_tick());

    let plan = match with_timeout(self.timing.ai_timeout(), self.ai.generate_lesson_plan(&req)).await {
      Ok(plan) => plan,
      Err(e) => {
        error!(target: "lesson", error = %e, "Lesson plan generation failed");
        let msg = format!("The AI model failed to generate a valid lesson plan. Details: {}", e);
        self.set_status(GenerationStatus::Failed { error: msg.clone() });
        return Err(GenerationError::Failed(msg));
      }
    };

    self.ledger.lock().await.deduct(OperationKind::LessonPlan);
    let entry_id = self.history.write().await.prepend(plan.clone(), None, self.clock.now());
    self.autosave.clear();
    self.set_status(GenerationStatus::Idle);
    drop(guard);
    info!(target: "lesson", %entry_id, title = %plan.title, questions = plan.comprehension_questions.len(), "Lesson plan ready");

    let enrichment = self.spawn_enrichment(entry_id, plan.reading_passage.clone());
    Ok(Generated { entry_id, plan, enrichment })
  }

  fn spawn_enrichment(&self, entry_id: EntryId, passage: String) -> JoinHandle<()> {
    let ai = Arc::clone(&self.ai);
    let history = Arc::clone(&self.history);
    let limit = self.timing.ai_timeout();
    tokio::spawn(
      async move {
        let sources = match with_timeout(limit, ai.find_sources(&passage)).await {
          Ok(s) => s,
          Err(e) => {
            warn!(target: "lesson", error = %e, "Source lookup failed; continuing without sources");
            Vec::new()
          }
        };
        history.write().await.attach_sources(entry_id, sources);
      }
      .instrument(info_span!("enrichment", %entry_id)),
    )
  }

  /// Generate one practice-exam section and make it the session's current exam.
  #[instrument(level = "info", skip(self))]
  pub async fn generate_exam_section(self: &Arc<Self>, part: ExamPart) -> Result<ExamSection, GenerationError> {
    self.detached(move |this| async move { this.run_exam_section(part).await }).await
  }

  async fn run_exam_section(&self, part: ExamPart) -> Result<ExamSection, GenerationError> {
    let kind = OperationKind::for_exam(part);
    let mut guard = self.claim()?;
    self.gate(kind).await?;
    guard.start(kind, self.timing.loading_tick());

    let section = match with_timeout(self.timing.ai_timeout(), self.ai.generate_exam_section(part)).await {
      Ok(s) => s.sanitized(),
      Err(e) => {
        error!(target: "lesson", error = %e, %part, "Exam section generation failed");
        let msg = format!("Failed to generate the exam section. Details: {}", e);
        self.set_status(GenerationStatus::Failed { error: msg.clone() });
        return Err(GenerationError::Failed(msg));
      }
    };
    if section.questions.is_empty() {
      let msg = "Failed to generate the exam section. Details: no usable questions".to_string();
      self.set_status(GenerationStatus::Failed { error: msg.clone() });
      return Err(GenerationError::Failed(msg));
    }

    self.ledger.lock().await.deduct(kind);
    *self.current_exam.write().await = Some((part, section.clone()));
    self.set_status(GenerationStatus::Idle);
    drop(guard);
    info!(target: "lesson", %part, questions = section.questions.len(), "Exam section ready");
    Ok(section)
  }

  /// A topic suggestion; never fails, falls back to the seed list.
  pub async fn random_topic(&self) -> String {
    match with_timeout(self.timing.ai_timeout(), self.ai.random_topic()).await {
      Ok(topic) => topic,
      Err(e) => {
        debug!(target: "lesson", error = %e, "Random topic from seed list");
        random_seed_topic()
      }
    }
  }

  /// Persist the active history entry with the form parameters.
  pub async fn save_lesson(&self, params: LessonRequest) -> Result<(), String> {
    let saved = {
      let history = self.history.read().await;
      let entry = history.active().ok_or_else(|| "There is no lesson plan to save.".to_string())?;
      SavedLesson { params, lesson_plan: (*entry.lesson_plan).clone(), sources: entry.sources.clone() }
    };
    save_json(self.store.as_ref(), KEY_SAVED_LESSON, &saved).map_err(|e| {
      error!(target: "lesson", error = %e, "Saving lesson failed");
      "Could not save the lesson plan.".to_string()
    })?;
    self.autosave.clear();
    info!(target: "lesson", title = %saved.lesson_plan.title, "Lesson saved");
    Ok(())
  }

  pub fn has_saved_lesson(&self) -> bool {
    matches!(self.store.get(KEY_SAVED_LESSON), Ok(Some(_)))
  }

  /// Restore the saved lesson as the only history entry.
  pub async fn load_lesson(&self) -> Result<(SavedLesson, EntryId), String> {
    if !self.has_saved_lesson() {
      return Err("There is no saved lesson plan.".into());
    }
    // load_json drops the key when the value is corrupt
    let saved = load_json::<SavedLesson>(self.store.as_ref(), KEY_SAVED_LESSON)
      .ok_or_else(|| "Could not load the saved lesson plan. It might be corrupted.".to_string())?;
    let id = self
      .history
      .write()
      .await
      .reset_with(saved.lesson_plan.clone(), saved.sources.clone(), self.clock.now());
    self.autosave.clear();
    self.set_status(GenerationStatus::Idle);
    info!(target: "lesson", %id, title = %saved.lesson_plan.title, "Saved lesson loaded");
    Ok((saved, id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::AtomicUsize;

  use async_trait::async_trait;
  use chrono::{TimeZone, Utc};
  use tokio::sync::oneshot;

  use crate::ai::AiError;
  use crate::clock::ManualClock;
  use crate::config::CreditsCfg;
  use crate::credits::{CreditMode, SimpleCreditData};
  use crate::domain::{CefrLevel, ExamQuestion, GeneratedLessonPlan, GeneratedQuestion, QuestionType, Verdict};
  use crate::store::{MemoryStore, KEY_AUTOSAVE_DRAFT, KEY_CREDITS_SIMPLE};
  use crate::util::word_count;

  type Gate<T> = StdMutex<Option<oneshot::Receiver<T>>>;

  /// Scripted capability. Lesson calls may be held on a gate; source lookups
  /// are held per passage until the test releases them.
  #[derive(Default)]
  struct ScriptedAi {
    lesson_calls: AtomicUsize,
    fail_lesson: bool,
    lesson_delay: Option<Duration>,
    lesson_gate: Gate<()>,
    source_gates: StdMutex<HashMap<String, oneshot::Receiver<Vec<Source>>>>,
  }

  impl ScriptedAi {
    fn hold_sources(&self, passage: &str) -> oneshot::Sender<Vec<Source>> {
      let (tx, rx) = oneshot::channel();
      self.source_gates.lock().unwrap().insert(passage.to_string(), rx);
      tx
    }
  }

  fn raw_question(kind: &str, answer: &str, options: Option<Vec<&str>>) -> GeneratedQuestion {
    GeneratedQuestion {
      question: Some(format!("A {kind} question?")),
      kind: Some(kind.into()),
      answer: Some(answer.into()),
      options: options.map(|o| o.into_iter().map(String::from).collect()),
    }
  }

  #[async_trait]
  impl LessonAi for ScriptedAi {
    async fn generate_lesson_plan(&self, req: &LessonRequest) -> Result<LessonPlan, AiError> {
      self.lesson_calls.fetch_add(1, Ordering::SeqCst);
      let gate = self.lesson_gate.lock().unwrap().take();
      if let Some(rx) = gate {
        let _ = rx.await;
      }
      if let Some(delay) = self.lesson_delay {
        tokio::time::sleep(delay).await;
      }
      if self.fail_lesson {
        return Err(AiError::Http { status: 500, message: "upstream exploded".into() });
      }
      let passage = format!("[P1] {}", vec![req.topic.as_str(); req.passage_length as usize].join(" "));
      let raw = GeneratedLessonPlan {
        title: format!("All about {}", req.topic),
        cefr_level: Some(req.cefr_level.to_string()),
        pedagogical_rationale: "Builds inference skills.".into(),
        reading_passage: passage,
        key_vocabulary: Vec::new(),
        comprehension_questions: vec![
          raw_question("short-answer", "Because of pressure", None),
          raw_question("multiple-choice", "lava", Some(vec!["Ash", "Lava", "Ice"])),
          raw_question("true-false", "true", None),
          raw_question("short-answer", "Magma", None),
          raw_question("true-false", "False", None),
          raw_question("multiple-choice", "Ash", Some(vec!["Ash", "Steam"])),
          raw_question("true-false", "True", None),
          raw_question("short-answer", "Plates", None),
        ],
        writing_prompts: vec!["Describe an eruption.".into()],
      };
      raw.into_lesson_plan(req).ok_or(AiError::Parse("empty".into()))
    }

    async fn generate_exam_section(&self, part: ExamPart) -> Result<ExamSection, AiError> {
      Ok(ExamSection {
        title: part.title().into(),
        passage: "[P1] Text.".into(),
        questions: vec![ExamQuestion {
          question_number: 1,
          question_text: "What?".into(),
          kind: "multiple-choice".into(),
          paragraph_reference: "P1".into(),
          options: Some(vec!["a".into(), "b".into()]),
          answer: "a".into(),
        }],
        source_credit: None,
      })
    }

    async fn random_topic(&self) -> Result<String, AiError> {
      Err(AiError::Disabled)
    }

    async fn find_sources(&self, passage: &str) -> Result<Vec<Source>, AiError> {
      let rx = self.source_gates.lock().unwrap().remove(passage);
      match rx {
        Some(rx) => rx.await.map_err(|_| AiError::EmptyResponse),
        None => Err(AiError::EmptyResponse),
      }
    }

    async fn judge_answer(&self, _q: &str, _e: &str, _a: &str) -> Result<Verdict, AiError> {
      Err(AiError::Disabled)
    }
  }

  struct Fixture {
    orch: Arc<GenerationOrchestrator>,
    ai: Arc<ScriptedAi>,
    store: Arc<MemoryStore>,
    ledger: Arc<Mutex<CreditLedger>>,
  }

  fn fixture(ai: ScriptedAi) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap()));
    let ledger = Arc::new(Mutex::new(CreditLedger::new(
      store.clone(),
      clock.clone(),
      CreditsCfg::default(),
      CreditMode::Simple,
      false,
    )));
    let ai = Arc::new(ai);
    let autosave = Arc::new(DraftAutosave::new(store.clone(), Duration::from_millis(1500)));
    let orch = Arc::new(GenerationOrchestrator::new(
      ai.clone(),
      ledger.clone(),
      Arc::new(RwLock::new(HistoryStore::new())),
      autosave,
      store.clone(),
      clock,
      TimingCfg::default(),
    ));
    Fixture { orch, ai, store, ledger }
  }

  fn volcanoes() -> LessonRequest {
    LessonRequest {
      topic: "Volcanoes".into(),
      cefr_level: CefrLevel::B1,
      passage_length: 500,
      number_of_questions: 6,
      ..Default::default()
    }
  }

  fn remaining(f: &Fixture) -> u32 {
    load_json::<SimpleCreditData>(f.store.as_ref(), KEY_CREDITS_SIMPLE).unwrap().credits
  }

  #[tokio::test]
  async fn volcanoes_lesson_is_ordered_counted_and_charged() {
    let f = fixture(ScriptedAi::default());
    save_json(f.store.as_ref(), KEY_AUTOSAVE_DRAFT, &volcanoes()).unwrap();

    let out = f.orch.generate_lesson(volcanoes()).await.unwrap();
    let plan = &out.plan;
    assert_eq!(plan.cefr_level, CefrLevel::B1);
    assert!(crate::domain::passage_within_tolerance(word_count(&plan.reading_passage), 500));
    assert_eq!(plan.comprehension_questions.len(), 6);
    let kinds: Vec<QuestionType> = plan.comprehension_questions.iter().map(|q| q.kind).collect();
    let mut sorted = kinds.clone();
    sorted.sort_by_key(|k| k.rank());
    assert_eq!(kinds, sorted);
    assert_eq!(plan.comprehension_questions[3].answer, "Lava");

    assert_eq!(remaining(&f), 3);
    assert!(f.store.get(KEY_AUTOSAVE_DRAFT).unwrap().is_none());
    assert_eq!(f.orch.status(), GenerationStatus::Idle);
    let history = f.orch.history().read().await;
    assert_eq!(history.active_id(), Some(out.entry_id));
  }

  #[tokio::test]
  async fn insufficient_credits_reject_before_any_call() {
    let f = fixture(ScriptedAi::default());
    save_json(
      f.store.as_ref(),
      KEY_CREDITS_SIMPLE,
      &SimpleCreditData { credits: 1, last_reset_timestamp: Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap() },
    )
    .unwrap();
    f.ledger.lock().await.initialize();
    let writes = f.store.write_count();

    let err = f.orch.generate_lesson(volcanoes()).await.unwrap_err();
    assert_eq!(err, GenerationError::QuotaExceeded("You need 2 credits. Credits reset daily.".into()));
    assert_eq!(f.ai.lesson_calls.load(Ordering::SeqCst), 0);
    assert_eq!(remaining(&f), 1);
    assert_eq!(f.store.write_count(), writes);
    assert!(f.orch.history().read().await.is_empty());
    assert_eq!(f.orch.status(), GenerationStatus::Idle);
    assert!(!f.orch.is_in_flight());

    f.orch.generate_exam_section(ExamPart::Reading1).await.unwrap();
    assert_eq!(remaining(&f), 0);
  }

  #[tokio::test]
  async fn held_slot_refuses_before_the_credit_gate() {
    let f = fixture(ScriptedAi::default());
    let guard = f.orch.claim().unwrap();
    assert_eq!(f.orch.generate_lesson(volcanoes()).await.unwrap_err(), GenerationError::Busy);
    assert_eq!(f.orch.generate_exam_section(ExamPart::Reading2).await.unwrap_err(), GenerationError::Busy);
    drop(guard);

    assert_eq!(f.orch.status(), GenerationStatus::Idle);
    assert!(!f.orch.is_in_flight());
    assert_eq!(f.ai.lesson_calls.load(Ordering::SeqCst), 0);
    f.orch.generate_lesson(volcanoes()).await.unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn abandoned_request_still_commits_and_returns_to_idle() {
    let f = fixture(ScriptedAi { lesson_delay: Some(Duration::from_secs(30)), ..Default::default() });
    let orch = f.orch.clone();
    let caller = tokio::spawn(async move { orch.generate_lesson(volcanoes()).await.map(|g| g.entry_id) });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(matches!(f.orch.status(), GenerationStatus::Loading { .. }));
    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(f.orch.status(), GenerationStatus::Idle);
    assert!(!f.orch.is_in_flight());
    assert_eq!(f.orch.history().read().await.len(), 1);
    assert_eq!(remaining(&f), 3);
  }

  #[tokio::test]
  async fn guard_dropped_mid_load_marks_the_run_failed() {
    let f = fixture(ScriptedAi::default());
    let mut guard = f.orch.claim().unwrap();
    guard.start(OperationKind::LessonPlan, Duration::from_secs(1));
    assert!(matches!(f.orch.status(), GenerationStatus::Loading { .. }));
    drop(guard);

    assert!(!f.orch.is_in_flight());
    assert_eq!(f.orch.status(), GenerationStatus::Failed { error: INTERRUPTED.into() });
  }

  #[tokio::test]
  async fn blank_topic_is_a_validation_error() {
    let f = fixture(ScriptedAi::default());
    let req = LessonRequest { topic: "  ".into(), ..volcanoes() };
    assert!(matches!(f.orch.generate_lesson(req).await, Err(GenerationError::Validation(_))));
    assert_eq!(f.ai.lesson_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn failure_leaves_history_and_credits_alone() {
    let f = fixture(ScriptedAi { fail_lesson: true, ..Default::default() });
    let err = f.orch.generate_lesson(volcanoes()).await.unwrap_err();
    match err {
      GenerationError::Failed(msg) => {
        assert!(msg.starts_with("The AI model failed to generate a valid lesson plan. Details:"));
        assert!(msg.contains("upstream exploded"));
      }
      other => panic!("unexpected {other:?}"),
    }
    assert_eq!(remaining(&f), 5);
    assert!(f.orch.history().read().await.is_empty());
    assert!(matches!(f.orch.status(), GenerationStatus::Failed { .. }));
    assert!(!f.orch.is_in_flight());
  }

  #[tokio::test]
  async fn late_sources_land_on_the_entry_they_were_requested_for() {
    let f = fixture(ScriptedAi::default());
    let a_req = LessonRequest { topic: "Alpha".into(), passage_length: 3, ..volcanoes() };
    let b_req = LessonRequest { topic: "Beta".into(), passage_length: 3, ..volcanoes() };
    let a_sources = f.ai.hold_sources("[P1] Alpha Alpha Alpha");
    let b_sources = f.ai.hold_sources("[P1] Beta Beta Beta");

    let a = f.orch.generate_lesson(a_req).await.unwrap();
    let b = f.orch.generate_lesson(b_req).await.unwrap();
    b_sources.send(vec![Source { uri: "https://b.example".into(), title: "B".into() }]).unwrap();
    b.enrichment.await.unwrap();
    a_sources.send(vec![Source { uri: "https://a.example".into(), title: "A".into() }]).unwrap();
    a.enrichment.await.unwrap();

    let history = f.orch.history().read().await;
    assert_eq!(history.entries()[0].id, b.entry_id);
    assert_eq!(history.get(a.entry_id).unwrap().sources.as_ref().unwrap()[0].uri, "https://a.example");
    assert_eq!(history.get(b.entry_id).unwrap().sources.as_ref().unwrap()[0].uri, "https://b.example");
  }

  #[tokio::test]
  async fn failed_source_lookup_degrades_to_no_sources() {
    let f = fixture(ScriptedAi::default());
    let out = f.orch.generate_lesson(volcanoes()).await.unwrap();
    out.enrichment.await.unwrap();
    let history = f.orch.history().read().await;
    assert_eq!(history.get(out.entry_id).unwrap().sources, Some(Vec::new()));
  }

  #[tokio::test(start_paused = true)]
  async fn loading_message_rotates_and_second_request_is_busy() {
    let (release, gate) = oneshot::channel();
    let f = fixture(ScriptedAi { lesson_gate: StdMutex::new(Some(gate)), ..Default::default() });
    let orch = f.orch.clone();
    let running = tokio::spawn(async move { orch.generate_lesson(volcanoes()).await.map(|g| g.entry_id) });

    tokio::time::sleep(Duration::from_millis(2600)).await;
    match f.orch.status() {
      GenerationStatus::Loading { operation, message } => {
        assert_eq!(operation, OperationKind::LessonPlan);
        assert_eq!(message, LOADING_MESSAGES[1]);
      }
      other => panic!("expected loading, got {other:?}"),
    }
    assert_eq!(f.orch.generate_lesson(volcanoes()).await.unwrap_err(), GenerationError::Busy);

    release.send(()).unwrap();
    running.await.unwrap().unwrap();
    assert_eq!(f.orch.status(), GenerationStatus::Idle);
    assert_eq!(f.ai.lesson_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn exam_section_becomes_current_and_costs_one_credit() {
    let f = fixture(ScriptedAi::default());
    let section = f.orch.generate_exam_section(ExamPart::Reading1).await.unwrap();
    assert_eq!(section.questions.len(), 1);
    assert_eq!(f.orch.current_exam().await, Some((ExamPart::Reading1, section)));
    assert_eq!(remaining(&f), 4);
  }

  #[tokio::test]
  async fn random_topic_falls_back_to_seeds() {
    let f = fixture(ScriptedAi::default());
    let topic = f.orch.random_topic().await;
    assert!(crate::seeds::seed_topics().contains(&topic.as_str()));
  }

  #[tokio::test]
  async fn save_then_load_replaces_history_with_one_entry() {
    let f = fixture(ScriptedAi::default());
    assert!(f.orch.save_lesson(volcanoes()).await.is_err());
    f.orch.generate_lesson(volcanoes()).await.unwrap();
    f.orch.generate_lesson(LessonRequest { topic: "Glaciers".into(), ..volcanoes() }).await.unwrap();
    f.orch.save_lesson(LessonRequest { topic: "Glaciers".into(), ..volcanoes() }).await.unwrap();

    let (saved, id) = f.orch.load_lesson().await.unwrap();
    assert_eq!(saved.params.topic, "Glaciers");
    let history = f.orch.history().read().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history.active_id(), Some(id));
  }

  #[tokio::test]
  async fn corrupt_saved_lesson_is_reported_and_removed() {
    let f = fixture(ScriptedAi::default());
    f.store.set(KEY_SAVED_LESSON, "{not json").unwrap();
    let err = f.orch.load_lesson().await.unwrap_err();
    assert_eq!(err, "Could not load the saved lesson plan. It might be corrupted.");
    assert!(!f.orch.has_saved_lesson());
  }
}
