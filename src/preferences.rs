//! User preferences and the feedback log, both persisted in the key-value store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::credits::CreditMode;
use crate::store::{load_json, save_json, KvStore, StoreError, KEY_CREDIT_MODE, KEY_FEEDBACK_LOG, KEY_ROLE, KEY_THEME};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
  #[default]
  Light,
  Dark,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
  #[default]
  Student,
  Instructor,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
  pub theme: Theme,
  pub role: UserRole,
  pub credit_mode: CreditMode,
}

/// Partial update; absent fields are left alone.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
  pub theme: Option<Theme>,
  pub role: Option<UserRole>,
  pub credit_mode: Option<CreditMode>,
}

impl Preferences {
  pub fn load(store: &dyn KvStore) -> Self {
    Self {
      theme: load_json(store, KEY_THEME).unwrap_or_default(),
      role: load_json(store, KEY_ROLE).unwrap_or_default(),
      credit_mode: load_json(store, KEY_CREDIT_MODE).unwrap_or_default(),
    }
  }

  /// Apply and persist the changed fields. Credit-mode changes are only
  /// recorded here; re-initializing the ledger is the caller's job.
  pub fn apply(&mut self, store: &dyn KvStore, patch: PreferencesPatch) -> Result<(), StoreError> {
    if let Some(theme) = patch.theme {
      save_json(store, KEY_THEME, &theme)?;
      self.theme = theme;
    }
    if let Some(role) = patch.role {
      save_json(store, KEY_ROLE, &role)?;
      self.role = role;
    }
    if let Some(mode) = patch.credit_mode {
      save_json(store, KEY_CREDIT_MODE, &mode)?;
      self.credit_mode = mode;
    }
    debug!(target: "fled_backend", prefs = ?self, "Preferences updated");
    Ok(())
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
  Liked,
  Disliked,
  TooEasy,
  JustRight,
  TooHard,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
  #[serde(rename = "type")]
  pub kind: FeedbackKind,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub timestamp: DateTime<Utc>,
  pub context: String,
}

pub fn feedback_log(store: &dyn KvStore) -> Vec<FeedbackEntry> {
  load_json(store, KEY_FEEDBACK_LOG).unwrap_or_default()
}

/// Append one entry; returns the new log length.
pub fn append_feedback(store: &dyn KvStore, entry: FeedbackEntry) -> Result<usize, StoreError> {
  let mut log = feedback_log(store);
  info!(target: "fled_backend", kind = ?entry.kind, context = %entry.context, "Feedback recorded");
  log.push(entry);
  save_json(store, KEY_FEEDBACK_LOG, &log)?;
  Ok(log.len())
}
