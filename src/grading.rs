//! Grading orchestrator: one verdict per question, keyed by ordinal.
//!
//! Closed questions are compared locally. Open questions are judged by the AI
//! capability, all dispatched at once and joined before returning. A failed or
//! unparseable judgment counts as incorrect.

use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::ai::{with_timeout, LessonAi};
use crate::domain::{
  ComprehensionQuestion, ExamQuestion, GradingResult, GradingResults, QuestionType, UserAnswers, Verdict,
};
use crate::util::{is_blank, normalize_answer, trunc_for_log};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
  Exact,
  Semantic,
}

/// A question reduced to what grading needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradableQuestion {
  pub ordinal: u32,
  pub prompt: String,
  pub canonical: String,
  pub mode: MatchMode,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<String>>,
}

impl GradableQuestion {
  /// Lesson questions are numbered by position, starting at 1.
  pub fn from_lesson(questions: &[ComprehensionQuestion]) -> Vec<Self> {
    questions
      .iter()
      .enumerate()
      .map(|(i, q)| GradableQuestion {
        ordinal: i as u32 + 1,
        prompt: q.question.clone(),
        canonical: q.answer.clone(),
        mode: match q.kind {
          QuestionType::ShortAnswer => MatchMode::Semantic,
          QuestionType::TrueFalse | QuestionType::MultipleChoice => MatchMode::Exact,
        },
        options: q.options.clone(),
      })
      .collect()
  }

  /// Exam questions carry their own number; anything with options is closed.
  pub fn from_exam(questions: &[ExamQuestion]) -> Vec<Self> {
    questions
      .iter()
      .map(|q| GradableQuestion {
        ordinal: q.question_number,
        prompt: q.question_text.clone(),
        canonical: q.answer.clone(),
        mode: if q.options.is_some() { MatchMode::Exact } else { MatchMode::Semantic },
        options: q.options.clone(),
      })
      .collect()
  }
}

pub fn exact_match(answer: &str, canonical: &str) -> bool {
  normalize_answer(answer) == normalize_answer(canonical)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
  pub correct: usize,
  pub total: usize,
}

pub fn score(results: &GradingResults) -> Score {
  Score {
    correct: results.values().filter(|r| r.result == Verdict::Correct).count(),
    total: results.len(),
  }
}

async fn verdict_for(ai: &dyn LessonAi, q: &GradableQuestion, answer: &str, timeout: Duration) -> Verdict {
  match q.mode {
    MatchMode::Exact => {
      if exact_match(answer, &q.canonical) { Verdict::Correct } else { Verdict::Incorrect }
    }
    MatchMode::Semantic => {
      if is_blank(answer) {
        return Verdict::Incorrect;
      }
      match with_timeout(timeout, ai.judge_answer(&q.prompt, &q.canonical, answer)).await {
        Ok(v) => v,
        Err(e) => {
          warn!(target: "grading", ordinal = q.ordinal, error = %e, "Semantic judgment failed; marking incorrect");
          Verdict::Incorrect
        }
      }
    }
  }
}

/// Grade every question concurrently and join on all of them.
#[instrument(level = "info", skip_all, fields(questions = questions.len()))]
pub async fn grade(
  ai: &dyn LessonAi,
  questions: &[GradableQuestion],
  answers: &UserAnswers,
  timeout: Duration,
) -> GradingResults {
  let pending = questions.iter().map(|q| async move {
    let user_answer = answers.get(&q.ordinal).cloned().unwrap_or_default();
    let result = verdict_for(ai, q, &user_answer, timeout).await;
    debug!(target: "grading", ordinal = q.ordinal, ?result, answer = %trunc_for_log(&user_answer, 60), "Verdict");
    (q.ordinal, GradingResult { result, correct_answer: q.canonical.clone(), user_answer })
  });

  let results: GradingResults = join_all(pending).await.into_iter().collect();
  let s = score(&results);
  info!(target: "grading", correct = s.correct, total = s.total, "Grading pass complete");
  results
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  use async_trait::async_trait;
  use tokio::sync::oneshot;

  use crate::ai::AiError;
  use crate::domain::{ExamPart, ExamSection, LessonPlan, LessonRequest, Source};

  /// Judge whose replies are released by the test, one gate per expected answer.
  #[derive(Default)]
  pub(crate) struct GatedJudge {
    pub gates: Mutex<HashMap<String, oneshot::Receiver<Result<Verdict, AiError>>>>,
    pub calls: AtomicUsize,
  }

  impl GatedJudge {
    pub fn gate(&self, expected: &str) -> oneshot::Sender<Result<Verdict, AiError>> {
      let (tx, rx) = oneshot::channel();
      self.gates.lock().unwrap().insert(expected.to_string(), rx);
      tx
    }
  }

  #[async_trait]
  impl LessonAi for GatedJudge {
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
    async fn judge_answer(&self, _question: &str, expected: &str, _answer: &str) -> Result<Verdict, AiError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let rx = self.gates.lock().unwrap().remove(expected);
      match rx {
        Some(rx) => rx.await.unwrap_or(Err(AiError::EmptyResponse)),
        None => Err(AiError::EmptyResponse),
      }
    }
  }

  fn q(ordinal: u32, canonical: &str, mode: MatchMode) -> GradableQuestion {
    GradableQuestion { ordinal, prompt: format!("Q{ordinal}"), canonical: canonical.into(), mode, options: None }
  }

  fn answers(pairs: &[(u32, &str)]) -> UserAnswers {
    pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
  }

  #[test]
  fn exact_match_ignores_case_and_surrounding_space() {
    assert!(exact_match("Paris ", "Paris"));
    assert!(exact_match("paris", "Paris"));
    assert!(!exact_match("Pari", "Paris"));
  }

  #[test]
  fn lesson_questions_map_to_ordinals_and_modes() {
    let qs = vec![
      ComprehensionQuestion { question: "a".into(), kind: QuestionType::TrueFalse, answer: "True".into(), options: None },
      ComprehensionQuestion { question: "b".into(), kind: QuestionType::ShortAnswer, answer: "x".into(), options: None },
    ];
    let g = GradableQuestion::from_lesson(&qs);
    assert_eq!((g[0].ordinal, g[0].mode), (1, MatchMode::Exact));
    assert_eq!((g[1].ordinal, g[1].mode), (2, MatchMode::Semantic));
  }

  #[tokio::test]
  async fn results_are_keyed_by_ordinal_whatever_the_completion_order() {
    let judge = GatedJudge::default();
    let first = judge.gate("alpha");
    let second = judge.gate("beta");
    let questions = vec![
      q(1, "True", MatchMode::Exact),
      q(2, "alpha", MatchMode::Semantic),
      q(3, "beta", MatchMode::Semantic),
      q(4, "C", MatchMode::Exact),
    ];
    let given = answers(&[(1, " true"), (2, "a"), (3, "b")]);

    let grading = grade(&judge, &questions, &given, Duration::from_secs(5));
    let release = async {
      tokio::task::yield_now().await;
      second.send(Ok(Verdict::Correct)).unwrap();
      tokio::task::yield_now().await;
      first.send(Ok(Verdict::Incorrect)).unwrap();
    };
    let (results, ()) = tokio::join!(grading, release);

    assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert_eq!(results[&1].result, Verdict::Correct);
    assert_eq!(results[&2].result, Verdict::Incorrect);
    assert_eq!(results[&3].result, Verdict::Correct);
    assert_eq!(results[&4].result, Verdict::Incorrect);
    assert_eq!(results[&4].user_answer, "");
    assert_eq!(judge.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn failed_judgment_counts_as_incorrect_without_aborting() {
    let judge = GatedJudge::default();
    let ok = judge.gate("fine");
    ok.send(Ok(Verdict::Correct)).unwrap();
    let questions = vec![q(1, "fine", MatchMode::Semantic), q(2, "broken", MatchMode::Semantic)];
    let results = grade(&judge, &questions, &answers(&[(1, "x"), (2, "y")]), Duration::from_secs(5)).await;
    assert_eq!(results[&1].result, Verdict::Correct);
    assert_eq!(results[&2].result, Verdict::Incorrect);
  }

  #[tokio::test]
  async fn blank_open_answer_is_incorrect_without_a_call() {
    let judge = GatedJudge::default();
    let results = grade(&judge, &[q(7, "anything", MatchMode::Semantic)], &answers(&[(7, "   ")]), Duration::from_secs(5)).await;
    assert_eq!(results[&7].result, Verdict::Incorrect);
    assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn a_stuck_judgment_times_out_as_incorrect() {
    let judge = GatedJudge::default();
    let _never = judge.gate("slow");
    let results = grade(&judge, &[q(1, "slow", MatchMode::Semantic)], &answers(&[(1, "x")]), Duration::from_secs(3)).await;
    assert_eq!(results[&1].result, Verdict::Incorrect);
  }

  #[test]
  fn score_counts_correct_verdicts() {
    let mut r = GradingResults::new();
    r.insert(1, GradingResult { result: Verdict::Correct, correct_answer: "a".into(), user_answer: "a".into() });
    r.insert(2, GradingResult { result: Verdict::Incorrect, correct_answer: "b".into(), user_answer: "".into() });
    assert_eq!(score(&r), Score { correct: 1, total: 2 });
  }
}
