//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - generation, history, saved lesson and draft operations
//!   - starting, answering and grading interactive tests
//!   - export, preferences and feedback
//! Errors come back as `ApiError`; the transports map them to their own shape.

use tracing::{debug, info, instrument, warn};

use crate::export::{export_exam, export_lesson, Document};
use crate::generation::GenerationError;
use crate::grading::{grade, GradableQuestion};
use crate::history::EntryId;
use crate::preferences::{append_feedback, FeedbackEntry, FeedbackKind, PreferencesPatch};
use crate::protocol::*;
use crate::state::AppState;
use crate::domain::{ExamPart, LessonRequest};
use crate::store::StoreError;
use crate::test_runner::{RunnerError, Step, TestKind, TestView};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error(transparent)]
  Generation(#[from] GenerationError),
  #[error(transparent)]
  Runner(#[from] RunnerError),
  #[error("storage failure: {0}")]
  Store(#[from] StoreError),
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  Conflict(String),
}

pub async fn credits(state: &AppState) -> CreditsOut {
  let ledger = state.ledger.lock().await;
  CreditsOut { mode: ledger.mode(), dev_mode: ledger.dev_mode(), snapshot: ledger.snapshot() }
}

#[instrument(level = "info", skip(state, req))]
pub async fn generate_lesson(state: &AppState, req: LessonRequest) -> Result<LessonOut, ApiError> {
  *state.form.write().await = req.clone();
  let generated = state.generation.generate_lesson(req).await?;
  // enrichment keeps running on its own; the client polls lesson/status for sources
  drop(generated.enrichment);
  Ok(LessonOut { entry_id: generated.entry_id, lesson_plan: generated.plan, credits: credits(state).await })
}

pub async fn lesson_status(state: &AppState) -> StatusOut {
  let active = state.generation.history().read().await.active().cloned();
  StatusOut {
    status: state.generation.status(),
    in_flight: state.generation.is_in_flight(),
    has_saved_lesson: state.generation.has_saved_lesson(),
    active,
  }
}

pub async fn history(state: &AppState) -> Vec<HistorySummary> {
  let history = state.generation.history().read().await;
  let active = history.active_id();
  history
    .entries()
    .iter()
    .map(|e| HistorySummary {
      id: e.id,
      title: e.lesson_plan.title.clone(),
      cefr_level: e.lesson_plan.cefr_level,
      created_at: e.created_at,
      sources_ready: e.sources.is_some(),
      active: Some(e.id) == active,
    })
    .collect()
}

pub async fn select_history(state: &AppState, id: EntryId) -> Result<crate::history::HistoryEntry, ApiError> {
  let mut history = state.generation.history().write().await;
  history
    .select(id)
    .cloned()
    .ok_or_else(|| ApiError::NotFound(format!("Unknown history entry: {}", id)))
}

pub async fn save_lesson(state: &AppState, params: LessonRequest) -> Result<(), ApiError> {
  *state.form.write().await = params.clone();
  state.generation.save_lesson(params).await.map_err(ApiError::NotFound)
}

pub async fn load_lesson(state: &AppState) -> Result<LoadOut, ApiError> {
  let (saved, id) = state.generation.load_lesson().await.map_err(ApiError::NotFound)?;
  *state.form.write().await = saved.params.clone();
  let entry = state
    .generation
    .history()
    .read()
    .await
    .get(id)
    .cloned()
    .ok_or_else(|| ApiError::NotFound("Loaded lesson vanished from history.".into()))?;
  Ok(LoadOut { params: saved.params, entry })
}

/// Record a form edit and let autosave decide whether to persist it.
pub async fn draft_changed(state: &AppState, draft: LessonRequest) -> DraftOut {
  let has_result = state.generation.history().read().await.active().is_some();
  let scheduled = state.autosave.observe(&draft, has_result, state.generation.is_in_flight());
  *state.form.write().await = draft;
  DraftOut { draft: None, scheduled }
}

pub fn draft_offer(state: &AppState) -> DraftOut {
  DraftOut { draft: state.autosave.offer(), scheduled: false }
}

pub async fn draft_restore(state: &AppState) -> Result<DraftOut, ApiError> {
  let draft = state
    .autosave
    .restore()
    .ok_or_else(|| ApiError::NotFound("There is no draft to restore.".into()))?;
  *state.form.write().await = draft.clone();
  info!(target: "lesson", topic = %crate::util::trunc_for_log(&draft.topic, 60), "Draft restored");
  Ok(DraftOut { draft: Some(draft), scheduled: false })
}

pub fn draft_discard(state: &AppState) -> DraftOut {
  state.autosave.discard();
  DraftOut::default()
}

pub async fn random_topic(state: &AppState) -> TopicOut {
  TopicOut { topic: state.generation.random_topic().await }
}

#[instrument(level = "info", skip(state))]
pub async fn generate_exam(state: &AppState, part: ExamPart) -> Result<ExamOut, ApiError> {
  let section = state.generation.generate_exam_section(part).await?;
  Ok(ExamOut { section, credits: credits(state).await })
}

/// Start a fresh test over the active lesson or the current exam.
#[instrument(level = "info", skip(state))]
pub async fn start_test(state: &AppState, target: Target) -> Result<TestView, ApiError> {
  let (kind, questions) = match target {
    Target::Lesson => {
      let history = state.generation.history().read().await;
      let entry = history
        .active()
        .ok_or_else(|| ApiError::NotFound("Generate or load a lesson plan first.".into()))?;
      (TestKind::Lesson, GradableQuestion::from_lesson(&entry.lesson_plan.comprehension_questions))
    }
    Target::Exam => {
      let (part, section) = state
        .generation
        .current_exam()
        .await
        .ok_or_else(|| ApiError::NotFound("Generate an exam section first.".into()))?;
      (TestKind::Exam(part), GradableQuestion::from_exam(&section.questions))
    }
  };
  let mut runner = state.runner.lock().await;
  runner.start(kind, questions, kind.duration(&state.timing));
  runner.view().ok_or(ApiError::Runner(RunnerError::NoActiveSession))
}

pub async fn answer(state: &AppState, ordinal: u32, text: String) -> Result<TestView, ApiError> {
  let mut runner = state.runner.lock().await;
  runner.answer(ordinal, text)?;
  runner.view().ok_or(ApiError::Runner(RunnerError::NoActiveSession))
}

/// Advance; on the last question, grade and return the graded view.
#[instrument(level = "info", skip(state))]
pub async fn next(state: &AppState) -> Result<TestView, ApiError> {
  let step = state.runner.lock().await.next()?;
  let ticket = match step {
    Step::Advanced { index } => {
      debug!(target: "grading", index, "Next question");
      return state.runner.lock().await.view().ok_or(ApiError::Runner(RunnerError::NoActiveSession));
    }
    Step::ReadyToGrade(ticket) => ticket,
  };

  // Grade in a task of its own so a dropped request cannot strand the session.
  let ai = state.ai.clone();
  let runner = state.runner.clone();
  let timeout = state.timing.ai_timeout();
  let job = tokio::spawn(async move {
    let results = grade(ai.as_ref(), &ticket.questions, &ticket.answers, timeout).await;
    runner.lock().await.complete_grading(ticket.session_id, results)
  });
  match job.await {
    Ok(true) => {}
    Ok(false) => return Err(ApiError::Conflict("The test was closed before grading finished.".into())),
    Err(e) => {
      warn!(target: "grading", error = %e, "Grading task failed");
      return Err(ApiError::Conflict("Grading failed; please try again.".into()));
    }
  }
  state.runner.lock().await.view().ok_or(ApiError::Runner(RunnerError::NoActiveSession))
}

pub async fn quit(state: &AppState) -> QuitOut {
  QuitOut { quit: state.runner.lock().await.quit() }
}

pub async fn test_view(state: &AppState) -> Result<TestView, ApiError> {
  state.runner.lock().await.view().ok_or(ApiError::Runner(RunnerError::NoActiveSession))
}

pub async fn export(state: &AppState, target: Target) -> Result<Document, ApiError> {
  match target {
    Target::Lesson => {
      let history = state.generation.history().read().await;
      let entry = history
        .active()
        .ok_or_else(|| ApiError::NotFound("There is no lesson plan to export.".into()))?;
      Ok(export_lesson(&entry.lesson_plan, entry.sources.as_deref()))
    }
    Target::Exam => {
      let (_, section) = state
        .generation
        .current_exam()
        .await
        .ok_or_else(|| ApiError::NotFound("There is no exam section to export.".into()))?;
      Ok(export_exam(&section))
    }
  }
}

pub async fn preferences(state: &AppState) -> PreferencesOut {
  PreferencesOut { preferences: *state.preferences.read().await, credits: credits(state).await }
}

/// Apply a preference patch. A changed credit mode resets the ledger.
#[instrument(level = "info", skip(state))]
pub async fn set_preferences(state: &AppState, patch: PreferencesPatch) -> Result<PreferencesOut, ApiError> {
  let mode_change = {
    let mut prefs = state.preferences.write().await;
    let before = prefs.credit_mode;
    prefs.apply(state.store.as_ref(), patch)?;
    (prefs.credit_mode != before).then_some(prefs.credit_mode)
  };
  if let Some(mode) = mode_change {
    state.ledger.lock().await.switch_mode(mode);
  }
  Ok(preferences(state).await)
}

pub fn feedback(state: &AppState, kind: FeedbackKind, context: String) -> Result<FeedbackOut, ApiError> {
  let entry = FeedbackEntry { kind, timestamp: state.clock.now(), context };
  let count = append_feedback(state.store.as_ref(), entry)?;
  Ok(FeedbackOut { count })
}
