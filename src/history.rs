//! In-session history of generated lesson plans, most recent first.
//!
//! Entries are addressed by a generated `EntryId` so late source enrichment
//! always lands on the entry it was requested for.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{LessonPlan, Source};

pub type EntryId = Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
  pub id: EntryId,
  pub created_at: DateTime<Utc>,
  pub lesson_plan: Arc<LessonPlan>,
  /// `None` while enrichment is still running.
  pub sources: Option<Vec<Source>>,
}

#[derive(Debug, Default)]
pub struct HistoryStore {
  entries: Vec<HistoryEntry>,
  active: Option<EntryId>,
}

impl HistoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Prepend a plan and make it the active entry.
  pub fn prepend(&mut self, plan: LessonPlan, sources: Option<Vec<Source>>, now: DateTime<Utc>) -> EntryId {
    let id = Uuid::new_v4();
    self.entries.insert(0, HistoryEntry { id, created_at: now, lesson_plan: Arc::new(plan), sources });
    self.active = Some(id);
    debug!(target: "lesson", %id, len = self.entries.len(), "History entry added");
    id
  }

  /// Drop everything and start over with a single entry (loading a saved lesson).
  pub fn reset_with(&mut self, plan: LessonPlan, sources: Option<Vec<Source>>, now: DateTime<Utc>) -> EntryId {
    self.entries.clear();
    self.prepend(plan, sources, now)
  }

  /// Attach enrichment results to the entry they were requested for.
  /// Returns false if that entry no longer exists.
  pub fn attach_sources(&mut self, id: EntryId, sources: Vec<Source>) -> bool {
    match self.entries.iter_mut().find(|e| e.id == id) {
      Some(entry) => {
        debug!(target: "lesson", %id, count = sources.len(), "Sources attached");
        entry.sources = Some(sources);
        true
      }
      None => {
        warn!(target: "lesson", %id, "Sources arrived for an unknown history entry");
        false
      }
    }
  }

  /// Pure read: moves the active pointer, never removes anything.
  pub fn select(&mut self, id: EntryId) -> Option<&HistoryEntry> {
    let entry = self.entries.iter().find(|e| e.id == id)?;
    self.active = Some(id);
    Some(entry)
  }

  pub fn get(&self, id: EntryId) -> Option<&HistoryEntry> {
    self.entries.iter().find(|e| e.id == id)
  }

  pub fn active(&self) -> Option<&HistoryEntry> {
    self.active.and_then(|id| self.get(id))
  }

  pub fn active_id(&self) -> Option<EntryId> {
    self.active
  }

  pub fn entries(&self) -> &[HistoryEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
