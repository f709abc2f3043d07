//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credits::{CreditMode, CreditSnapshot};
use crate::domain::{CefrLevel, ExamPart, ExamSection, LessonPlan, LessonRequest};
use crate::generation::GenerationStatus;
use crate::history::{EntryId, HistoryEntry};
use crate::preferences::{FeedbackKind, Preferences, PreferencesPatch};
use crate::test_runner::TestView;

/// What a test or an export is built from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// The active history entry.
    #[default]
    Lesson,
    /// The session's current exam section.
    Exam,
}

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    GetCredits,
    GenerateLesson {
        request: LessonRequest,
    },
    LessonStatus,
    GetHistory,
    SelectHistory {
        id: EntryId,
    },
    SaveLesson {
        params: LessonRequest,
    },
    LoadLesson,
    DraftChanged {
        draft: LessonRequest,
    },
    DraftOffer,
    DraftRestore,
    DraftDiscard,
    RandomTopic,
    GenerateExam {
        part: ExamPart,
    },
    StartTest {
        #[serde(default)]
        target: Target,
    },
    Answer {
        ordinal: u32,
        answer: String,
    },
    Next,
    Quit,
    GetTest,
    Export {
        #[serde(default)]
        target: Target,
    },
    GetPreferences,
    SetPreferences {
        #[serde(flatten)]
        patch: PreferencesPatch,
    },
    Feedback {
        kind: FeedbackKind,
        #[serde(default)]
        context: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Credits(CreditsOut),
    Lesson(LessonOut),
    Status(StatusOut),
    History {
        entries: Vec<HistorySummary>,
    },
    Entry {
        entry: HistoryEntry,
    },
    Saved,
    Loaded(LoadOut),
    Draft(DraftOut),
    Topic {
        topic: String,
    },
    Exam(ExamOut),
    Test {
        test: TestView,
    },
    TestClosed {
        quit: bool,
    },
    Document {
        file_name: String,
        pages: usize,
        content: String,
    },
    Preferences {
        preferences: Preferences,
        credits: CreditsOut,
    },
    FeedbackRecorded {
        count: usize,
    },
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsOut {
    pub mode: CreditMode,
    pub dev_mode: bool,
    #[serde(flatten)]
    pub snapshot: CreditSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonOut {
    pub entry_id: EntryId,
    pub lesson_plan: LessonPlan,
    pub credits: CreditsOut,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOut {
    pub status: GenerationStatus,
    pub in_flight: bool,
    pub has_saved_lesson: bool,
    pub active: Option<HistoryEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub id: EntryId,
    pub title: String,
    pub cefr_level: CefrLevel,
    pub created_at: DateTime<Utc>,
    /// False while source lookup is still running.
    pub sources_ready: bool,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct SelectIn {
    pub id: EntryId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOut {
    pub params: LessonRequest,
    pub entry: HistoryEntry,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftOut {
    /// Present when there is a draft for the client to restore.
    pub draft: Option<LessonRequest>,
    /// Whether an autosave write is now pending.
    pub scheduled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExamIn {
    pub part: ExamPart,
}

#[derive(Debug, Serialize)]
pub struct ExamOut {
    pub section: ExamSection,
    pub credits: CreditsOut,
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    #[serde(default)]
    pub target: Target,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    pub ordinal: u32,
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct QuitOut {
    pub quit: bool,
}

#[derive(Debug, Serialize)]
pub struct PreferencesOut {
    pub preferences: Preferences,
    pub credits: CreditsOut,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackIn {
    pub kind: FeedbackKind,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Serialize)]
pub struct FeedbackOut {
    pub count: usize,
}

#[derive(Serialize)]
pub struct TopicOut {
    pub topic: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub ai_enabled: bool,
}
