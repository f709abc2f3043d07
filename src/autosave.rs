//! Debounced autosave of the designer form.
//!
//! Only the latest snapshot inside the debounce window is ever written. A
//! write epoch guards against a timer that already fired racing a `clear`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::LessonRequest;
use crate::store::{load_json, save_json, KvStore, KEY_AUTOSAVE_DRAFT};

#[derive(Default)]
struct Pending {
  epoch: u64,
  task: Option<JoinHandle<()>>,
}

pub struct DraftAutosave {
  store: Arc<dyn KvStore>,
  debounce: Duration,
  pending: Arc<Mutex<Pending>>,
  offered: AtomicBool,
}

impl DraftAutosave {
  pub fn new(store: Arc<dyn KvStore>, debounce: Duration) -> Self {
    Self { store, debounce, pending: Arc::new(Mutex::new(Pending::default())), offered: AtomicBool::new(false) }
  }

  /// Feed the current form state. Any pending write is superseded; a new one
  /// is scheduled only if the form has content, no result exists yet and no
  /// generation is running. Returns whether a write was scheduled.
  pub fn observe(&self, draft: &LessonRequest, has_result: bool, in_flight: bool) -> bool {
    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    pending.epoch += 1;
    if let Some(task) = pending.task.take() {
      task.abort();
    }
    if !draft.has_content() || has_result || in_flight {
      return false;
    }

    let epoch = pending.epoch;
    let shared = Arc::clone(&self.pending);
    let store = Arc::clone(&self.store);
    let debounce = self.debounce;
    let draft = draft.clone();
    pending.task = Some(tokio::spawn(async move {
      tokio::time::sleep(debounce).await;
      let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
      if guard.epoch != epoch {
        return;
      }
      match save_json(store.as_ref(), KEY_AUTOSAVE_DRAFT, &draft) {
        Ok(()) => debug!(target: "lesson", "Draft autosaved"),
        Err(e) => warn!(target: "lesson", error = %e, "Draft autosave failed"),
      }
      guard.task = None;
    }));
    true
  }

  /// Drop a scheduled write without touching what is already persisted.
  fn cancel_pending(&self) {
    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    pending.epoch += 1;
    if let Some(task) = pending.task.take() {
      task.abort();
    }
  }

  /// Cancel any scheduled write and delete the persisted draft.
  pub fn clear(&self) {
    self.cancel_pending();
    if let Err(e) = self.store.remove(KEY_AUTOSAVE_DRAFT) {
      warn!(target: "lesson", error = %e, "Could not remove persisted draft");
    }
    info!(target: "lesson", "Draft cleared");
  }

  /// The persisted draft, if it holds any content. Offered at most once per session.
  pub fn offer(&self) -> Option<LessonRequest> {
    if self.offered.swap(true, Ordering::SeqCst) {
      return None;
    }
    self.persisted()
  }

  /// Take the persisted draft back into the form.
  pub fn restore(&self) -> Option<LessonRequest> {
    self.offered.store(true, Ordering::SeqCst);
    self.persisted()
  }

  /// Refuse the offered draft permanently.
  pub fn discard(&self) {
    self.offered.store(true, Ordering::SeqCst);
    self.clear();
  }

  pub fn persisted(&self) -> Option<LessonRequest> {
    load_json::<LessonRequest>(self.store.as_ref(), KEY_AUTOSAVE_DRAFT).filter(LessonRequest::has_content)
  }
}

impl Drop for DraftAutosave {
  fn drop(&mut self) {
    if let Ok(mut pending) = self.pending.lock() {
      if let Some(task) = pending.task.take() {
        task.abort();
      }
    }
  }
}
