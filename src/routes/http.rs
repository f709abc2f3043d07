//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and errors come back as `{ "type": "error", "message": ... }`.

use std::sync::Arc;
use axum::{
  extract::{Query, State},
  http::{header, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument, warn};

use crate::domain::LessonRequest;
use crate::generation::GenerationError;
use crate::logic::{self, ApiError};
use crate::preferences::PreferencesPatch;
use crate::protocol::*;
use crate::state::AppState;
use crate::test_runner::RunnerError;

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      ApiError::Generation(GenerationError::Validation(_)) => StatusCode::BAD_REQUEST,
      ApiError::Generation(GenerationError::QuotaExceeded(_)) => StatusCode::TOO_MANY_REQUESTS,
      ApiError::Generation(GenerationError::Busy) => StatusCode::CONFLICT,
      ApiError::Generation(GenerationError::Failed(_)) => StatusCode::BAD_GATEWAY,
      ApiError::Runner(RunnerError::NoActiveSession) => StatusCode::NOT_FOUND,
      ApiError::Runner(RunnerError::UnknownQuestion(_)) => StatusCode::BAD_REQUEST,
      ApiError::Runner(RunnerError::Frozen | RunnerError::TimeExpired | RunnerError::GradingInProgress) => {
        StatusCode::CONFLICT
      }
      ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      warn!(target: "fled_backend", %status, error = %self, "Request failed");
    }
    let body = Json(ServerWsMessage::Error { message: self.to_string() });
    (status, body).into_response()
  }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, ai_enabled: state.ai_enabled })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_credits(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::credits(&state).await)
}

#[instrument(level = "info", skip(state, body), fields(topic_len = body.topic.len(), level = %body.cefr_level))]
pub async fn http_post_lesson(
  State(state): State<Arc<AppState>>,
  Json(body): Json<LessonRequest>,
) -> ApiResult<LessonOut> {
  let out = logic::generate_lesson(&state, body).await?;
  info!(target: "lesson", id = %out.entry_id, "HTTP lesson generated");
  Ok(Json(out))
}

#[instrument(level = "debug", skip(state))]
pub async fn http_get_lesson_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::lesson_status(&state).await)
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::history(&state).await)
}

#[instrument(level = "info", skip(state, body), fields(id = %body.id))]
pub async fn http_post_history_select(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SelectIn>,
) -> ApiResult<crate::history::HistoryEntry> {
  Ok(Json(logic::select_history(&state, body.id).await?))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_lesson_save(
  State(state): State<Arc<AppState>>,
  Json(body): Json<LessonRequest>,
) -> Result<StatusCode, ApiError> {
  logic::save_lesson(&state, body).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_lesson_load(State(state): State<Arc<AppState>>) -> ApiResult<LoadOut> {
  Ok(Json(logic::load_lesson(&state).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_draft(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::draft_offer(&state))
}

#[instrument(level = "debug", skip(state, body))]
pub async fn http_put_draft(
  State(state): State<Arc<AppState>>,
  Json(body): Json<LessonRequest>,
) -> impl IntoResponse {
  Json(logic::draft_changed(&state, body).await)
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_draft_restore(State(state): State<Arc<AppState>>) -> ApiResult<DraftOut> {
  Ok(Json(logic::draft_restore(&state).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_draft_discard(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::draft_discard(&state))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_random_topic(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::random_topic(&state).await)
}

#[instrument(level = "info", skip(state), fields(part = %body.part))]
pub async fn http_post_exam(State(state): State<Arc<AppState>>, Json(body): Json<ExamIn>) -> ApiResult<ExamOut> {
  Ok(Json(logic::generate_exam(&state, body.part).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_test_start(
  State(state): State<Arc<AppState>>,
  Query(q): Query<TargetQuery>,
) -> ApiResult<crate::test_runner::TestView> {
  Ok(Json(logic::start_test(&state, q.target).await?))
}

#[instrument(level = "info", skip(state, body), fields(ordinal = body.ordinal, answer_len = body.answer.len()))]
pub async fn http_post_test_answer(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AnswerIn>,
) -> ApiResult<crate::test_runner::TestView> {
  Ok(Json(logic::answer(&state, body.ordinal, body.answer).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_test_next(State(state): State<Arc<AppState>>) -> ApiResult<crate::test_runner::TestView> {
  Ok(Json(logic::next(&state).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_test_quit(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::quit(&state).await)
}

#[instrument(level = "debug", skip(state))]
pub async fn http_get_test(State(state): State<Arc<AppState>>) -> ApiResult<crate::test_runner::TestView> {
  Ok(Json(logic::test_view(&state).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_export(
  State(state): State<Arc<AppState>>,
  Query(q): Query<TargetQuery>,
) -> Result<Response, ApiError> {
  let doc = logic::export(&state, q.target).await?;
  info!(target: "lesson", title = %doc.title, pages = doc.page_count(), "Document exported");
  let disposition = format!("attachment; filename=\"{}\"", doc.file_name());
  Ok(
    (
      [(header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()), (header::CONTENT_DISPOSITION, disposition)],
      doc.render(),
    )
      .into_response(),
  )
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_preferences(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::preferences(&state).await)
}

#[instrument(level = "info", skip(state))]
pub async fn http_put_preferences(
  State(state): State<Arc<AppState>>,
  Json(body): Json<PreferencesPatch>,
) -> ApiResult<PreferencesOut> {
  Ok(Json(logic::set_preferences(&state, body).await?))
}

#[instrument(level = "info", skip(state, body), fields(kind = ?body.kind))]
pub async fn http_post_feedback(
  State(state): State<Arc<AppState>>,
  Json(body): Json<FeedbackIn>,
) -> ApiResult<FeedbackOut> {
  Ok(Json(logic::feedback(&state, body.kind, body.context)?))
}
