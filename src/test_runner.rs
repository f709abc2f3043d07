//! Interactive test runner.
//!
//! Questions are presented one at a time; the last `next` hands the session
//! over to grading, and the verdicts freeze it. A session id travels with the
//! grading ticket so results for a quit or restarted session are dropped.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::TimingCfg;
use crate::domain::{ExamPart, GradingResults, UserAnswers};
use crate::grading::{score, GradableQuestion, Score};
use crate::util::format_mm_ss;

pub type SessionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
  #[error("no test is in progress")]
  NoActiveSession,
  #[error("this test has been graded; start a new one to try again")]
  Frozen,
  #[error("time is up; submit the test to see your results")]
  TimeExpired,
  #[error("question {0} is not part of this test")]
  UnknownQuestion(u32),
  #[error("answers are being graded")]
  GradingInProgress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "part", rename_all = "snake_case")]
pub enum TestKind {
  Lesson,
  Exam(ExamPart),
}

impl TestKind {
  pub fn duration(&self, timing: &TimingCfg) -> Duration {
    let minutes = match self {
      TestKind::Lesson => timing.lesson_test_minutes,
      TestKind::Exam(ExamPart::Reading1) => timing.reading1_minutes,
      TestKind::Exam(ExamPart::Reading2) => timing.reading2_minutes,
    };
    Duration::minutes(minutes as i64)
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Phase {
  Presenting { index: usize },
  Grading,
  Graded { results: GradingResults },
}

#[derive(Clone, Debug)]
pub struct TestSession {
  pub id: SessionId,
  pub kind: TestKind,
  pub questions: Vec<GradableQuestion>,
  pub answers: UserAnswers,
  pub phase: Phase,
  pub started_at: DateTime<Utc>,
  pub duration: Duration,
}

impl TestSession {
  fn knows(&self, ordinal: u32) -> bool {
    self.questions.iter().any(|q| q.ordinal == ordinal)
  }
}

/// Everything the grading pass needs, detached from the runner.
#[derive(Clone, Debug)]
pub struct GradingTicket {
  pub session_id: SessionId,
  pub questions: Vec<GradableQuestion>,
  pub answers: UserAnswers,
}

#[derive(Debug)]
pub enum Step {
  Advanced { index: usize },
  ReadyToGrade(GradingTicket),
}

pub struct TestRunner {
  clock: Arc<dyn Clock>,
  session: Option<TestSession>,
}

impl TestRunner {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self { clock, session: None }
  }

  pub fn session(&self) -> Option<&TestSession> {
    self.session.as_ref()
  }

  /// Start a brand-new session, replacing whatever was there.
  #[instrument(level = "info", skip(self, questions), fields(questions = questions.len()))]
  pub fn start(&mut self, kind: TestKind, questions: Vec<GradableQuestion>, duration: Duration) -> SessionId {
    let id = Uuid::new_v4();
    if let Some(old) = self.session.take() {
      debug!(target: "grading", old = %old.id, "Previous test session replaced");
    }
    self.session = Some(TestSession {
      id,
      kind,
      questions,
      answers: UserAnswers::new(),
      phase: Phase::Presenting { index: 0 },
      started_at: self.clock.now(),
      duration,
    });
    info!(target: "grading", session = %id, ?kind, "Test started");
    id
  }

  pub fn time_left(&self) -> Option<Duration> {
    let s = self.session.as_ref()?;
    let elapsed = self.clock.now() - s.started_at;
    Some((s.duration - elapsed).max(Duration::zero()))
  }

  /// The countdown only matters until grading starts.
  pub fn is_expired(&self) -> bool {
    matches!(
      self.session.as_ref().map(|s| &s.phase),
      Some(Phase::Presenting { .. })
    ) && self.time_left() == Some(Duration::zero())
  }

  pub fn answer(&mut self, ordinal: u32, text: String) -> Result<(), RunnerError> {
    let expired = self.is_expired();
    let s = self.session.as_mut().ok_or(RunnerError::NoActiveSession)?;
    match s.phase {
      Phase::Graded { .. } => return Err(RunnerError::Frozen),
      Phase::Grading => return Err(RunnerError::GradingInProgress),
      Phase::Presenting { .. } => {}
    }
    if expired {
      return Err(RunnerError::TimeExpired);
    }
    if !s.knows(ordinal) {
      return Err(RunnerError::UnknownQuestion(ordinal));
    }
    s.answers.insert(ordinal, text);
    Ok(())
  }

  /// Advance, or submit when on the last question. Submitting stays possible
  /// after the countdown ran out.
  pub fn next(&mut self) -> Result<Step, RunnerError> {
    let expired = self.is_expired();
    let s = self.session.as_mut().ok_or(RunnerError::NoActiveSession)?;
    let index = match s.phase {
      Phase::Presenting { index } => index,
      Phase::Grading => return Err(RunnerError::GradingInProgress),
      Phase::Graded { .. } => return Err(RunnerError::Frozen),
    };
    if index + 1 < s.questions.len() && !expired {
      s.phase = Phase::Presenting { index: index + 1 };
      return Ok(Step::Advanced { index: index + 1 });
    }
    s.phase = Phase::Grading;
    info!(target: "grading", session = %s.id, answered = s.answers.len(), expired, "Test submitted for grading");
    Ok(Step::ReadyToGrade(GradingTicket {
      session_id: s.id,
      questions: s.questions.clone(),
      answers: s.answers.clone(),
    }))
  }

  /// Apply verdicts. Results for any session other than the one currently
  /// grading are dropped; returns whether they were applied.
  pub fn complete_grading(&mut self, session_id: SessionId, results: GradingResults) -> bool {
    match self.session.as_mut() {
      Some(s) if s.id == session_id && s.phase == Phase::Grading => {
        s.phase = Phase::Graded { results };
        true
      }
      _ => {
        warn!(target: "grading", session = %session_id, "Late grading result ignored");
        false
      }
    }
  }

  /// Discard the session. Nothing about it is kept.
  pub fn quit(&mut self) -> bool {
    match self.session.take() {
      Some(s) => {
        info!(target: "grading", session = %s.id, "Test quit");
        true
      }
      None => false,
    }
  }

  pub fn score(&self) -> Option<Score> {
    match &self.session.as_ref()?.phase {
      Phase::Graded { results } => Some(score(results)),
      _ => None,
    }
  }

  pub fn view(&self) -> Option<TestView> {
    let s = self.session.as_ref()?;
    let (state, current_index, results) = match &s.phase {
      Phase::Presenting { index } => ("presenting", Some(*index), None),
      Phase::Grading => ("grading", None, None),
      Phase::Graded { results } => ("graded", None, Some(results.clone())),
    };
    let graded = results.is_some();
    let left = self.time_left().unwrap_or_else(Duration::zero);
    Some(TestView {
      session_id: s.id,
      kind: s.kind,
      state,
      current_index,
      total: s.questions.len(),
      questions: s
        .questions
        .iter()
        .map(|q| QuestionView {
          ordinal: q.ordinal,
          prompt: q.prompt.clone(),
          options: q.options.clone(),
          correct_answer: graded.then(|| q.canonical.clone()),
        })
        .collect(),
      answers: s.answers.clone(),
      time_left: format_mm_ss(left.num_seconds().max(0) as u64),
      expired: self.is_expired(),
      score: self.score(),
      results,
    })
  }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
  pub ordinal: u32,
  pub prompt: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<String>>,
  /// Revealed once graded.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correct_answer: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestView {
  pub session_id: SessionId,
  pub kind: TestKind,
  pub state: &'static str,
  pub current_index: Option<usize>,
  pub total: usize,
  pub questions: Vec<QuestionView>,
  pub answers: UserAnswers,
  pub time_left: String,
  pub expired: bool,
  pub score: Option<Score>,
  pub results: Option<GradingResults>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::domain::{GradingResult, Verdict};
  use crate::grading::MatchMode;
  use chrono::TimeZone;

  fn questions(n: u32) -> Vec<GradableQuestion> {
    (1..=n)
      .map(|i| GradableQuestion {
        ordinal: i,
        prompt: format!("Question {i}"),
        canonical: "True".into(),
        mode: MatchMode::Exact,
        options: None,
      })
      .collect()
  }

  fn runner() -> (Arc<ManualClock>, TestRunner) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
    (clock.clone(), TestRunner::new(clock))
  }

  fn all_correct(ticket: &GradingTicket) -> GradingResults {
    ticket
      .questions
      .iter()
      .map(|q| (q.ordinal, GradingResult { result: Verdict::Correct, correct_answer: q.canonical.clone(), user_answer: String::new() }))
      .collect()
  }

  fn submit(r: &mut TestRunner) -> GradingTicket {
    loop {
      match r.next().unwrap() {
        Step::Advanced { .. } => continue,
        Step::ReadyToGrade(t) => return t,
      }
    }
  }

  #[test]
  fn walks_every_question_then_grades_once() {
    let (_, mut r) = runner();
    r.start(TestKind::Lesson, questions(3), Duration::minutes(15));
    r.answer(1, "True".into()).unwrap();
    assert!(matches!(r.next().unwrap(), Step::Advanced { index: 1 }));
    assert!(matches!(r.next().unwrap(), Step::Advanced { index: 2 }));
    let ticket = match r.next().unwrap() {
      Step::ReadyToGrade(t) => t,
      other => panic!("expected grading, got {other:?}"),
    };
    assert_eq!(ticket.answers.len(), 1);
    assert_eq!(r.next().unwrap_err(), RunnerError::GradingInProgress);

    assert!(r.complete_grading(ticket.session_id, all_correct(&ticket)));
    assert_eq!(r.score(), Some(Score { correct: 3, total: 3 }));
    assert_eq!(r.answer(2, "x".into()), Err(RunnerError::Frozen));
    assert_eq!(r.next().unwrap_err(), RunnerError::Frozen);
  }

  #[test]
  fn quitting_discards_answers_and_restart_is_clean() {
    let (_, mut r) = runner();
    r.start(TestKind::Lesson, questions(2), Duration::minutes(15));
    r.answer(1, "False".into()).unwrap();
    assert!(r.quit());
    assert!(r.session().is_none());
    assert_eq!(r.answer(1, "x".into()), Err(RunnerError::NoActiveSession));

    r.start(TestKind::Lesson, questions(2), Duration::minutes(15));
    let view = r.view().unwrap();
    assert!(view.answers.is_empty());
    assert_eq!(view.current_index, Some(0));
    assert!(view.results.is_none());
  }

  #[test]
  fn results_for_a_quit_session_are_ignored() {
    let (_, mut r) = runner();
    r.start(TestKind::Lesson, questions(1), Duration::minutes(15));
    let stale = submit(&mut r);
    r.quit();
    r.start(TestKind::Lesson, questions(1), Duration::minutes(15));
    assert!(!r.complete_grading(stale.session_id, all_correct(&stale)));
    assert_eq!(r.view().unwrap().state, "presenting");

    r.quit();
    assert!(!r.complete_grading(stale.session_id, GradingResults::new()));
  }

  #[test]
  fn unknown_question_is_rejected() {
    let (_, mut r) = runner();
    r.start(TestKind::Lesson, questions(2), Duration::minutes(15));
    assert_eq!(r.answer(9, "x".into()), Err(RunnerError::UnknownQuestion(9)));
  }

  #[test]
  fn countdown_expiry_locks_answers_but_allows_submit() {
    let (clock, mut r) = runner();
    r.start(TestKind::Exam(ExamPart::Reading1), questions(3), Duration::minutes(45));
    assert_eq!(r.view().unwrap().time_left, "45:00");
    clock.advance(Duration::minutes(44) + Duration::seconds(30));
    assert_eq!(r.view().unwrap().time_left, "00:30");
    clock.advance(Duration::seconds(31));
    assert!(r.is_expired());
    assert_eq!(r.answer(1, "x".into()), Err(RunnerError::TimeExpired));
    assert!(matches!(r.next().unwrap(), Step::ReadyToGrade(_)));
    assert!(!r.is_expired());
  }

  #[test]
  fn durations_follow_test_kind() {
    let t = TimingCfg::default();
    assert_eq!(TestKind::Lesson.duration(&t), Duration::minutes(15));
    assert_eq!(TestKind::Exam(ExamPart::Reading2).duration(&t), Duration::minutes(50));
  }

  #[test]
  fn empty_test_goes_straight_to_grading() {
    let (_, mut r) = runner();
    r.start(TestKind::Lesson, Vec::new(), Duration::minutes(15));
    assert!(matches!(r.next().unwrap(), Step::ReadyToGrade(_)));
  }
}
