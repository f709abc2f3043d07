//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{debug, error, info, instrument};

use crate::logic::{self, ApiError};
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "fled_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "fled_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        // Parse, dispatch, serialize response.
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "fled_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "fled_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "fled_backend", "WebSocket disconnected");
}

fn reply<T>(res: Result<T, ApiError>, wrap: impl FnOnce(T) -> ServerWsMessage) -> ServerWsMessage {
  match res {
    Ok(v) => wrap(v),
    Err(e) => ServerWsMessage::Error { message: e.to_string() },
  }
}

#[instrument(level = "info", skip(state))]
pub(crate) async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::GetCredits => ServerWsMessage::Credits(logic::credits(state).await),

    ClientWsMessage::GenerateLesson { request } => {
      let res = logic::generate_lesson(state, request).await;
      if let Ok(out) = &res {
        info!(target: "lesson", id = %out.entry_id, "WS lesson generated");
      }
      reply(res, ServerWsMessage::Lesson)
    }

    ClientWsMessage::LessonStatus => ServerWsMessage::Status(logic::lesson_status(state).await),

    ClientWsMessage::GetHistory => ServerWsMessage::History { entries: logic::history(state).await },

    ClientWsMessage::SelectHistory { id } => {
      reply(logic::select_history(state, id).await, |entry| ServerWsMessage::Entry { entry })
    }

    ClientWsMessage::SaveLesson { params } => reply(logic::save_lesson(state, params).await, |_| ServerWsMessage::Saved),

    ClientWsMessage::LoadLesson => reply(logic::load_lesson(state).await, ServerWsMessage::Loaded),

    ClientWsMessage::DraftChanged { draft } => ServerWsMessage::Draft(logic::draft_changed(state, draft).await),

    ClientWsMessage::DraftOffer => ServerWsMessage::Draft(logic::draft_offer(state)),

    ClientWsMessage::DraftRestore => reply(logic::draft_restore(state).await, ServerWsMessage::Draft),

    ClientWsMessage::DraftDiscard => ServerWsMessage::Draft(logic::draft_discard(state)),

    ClientWsMessage::RandomTopic => ServerWsMessage::Topic { topic: logic::random_topic(state).await.topic },

    ClientWsMessage::GenerateExam { part } => reply(logic::generate_exam(state, part).await, ServerWsMessage::Exam),

    ClientWsMessage::StartTest { target } => {
      reply(logic::start_test(state, target).await, |test| ServerWsMessage::Test { test })
    }

    ClientWsMessage::Answer { ordinal, answer } => {
      reply(logic::answer(state, ordinal, answer).await, |test| ServerWsMessage::Test { test })
    }

    ClientWsMessage::Next => reply(logic::next(state).await, |test| ServerWsMessage::Test { test }),

    ClientWsMessage::Quit => ServerWsMessage::TestClosed { quit: logic::quit(state).await.quit },

    ClientWsMessage::GetTest => reply(logic::test_view(state).await, |test| ServerWsMessage::Test { test }),

    ClientWsMessage::Export { target } => reply(logic::export(state, target).await, |doc| ServerWsMessage::Document {
      file_name: doc.file_name(),
      pages: doc.page_count(),
      content: doc.render(),
    }),

    ClientWsMessage::GetPreferences => {
      let out = logic::preferences(state).await;
      ServerWsMessage::Preferences { preferences: out.preferences, credits: out.credits }
    }

    ClientWsMessage::SetPreferences { patch } => reply(logic::set_preferences(state, patch).await, |out| {
      ServerWsMessage::Preferences { preferences: out.preferences, credits: out.credits }
    }),

    ClientWsMessage::Feedback { kind, context } => {
      reply(logic::feedback(state, kind, context), |out| ServerWsMessage::FeedbackRecorded { count: out.count })
    }
  }
}
