//! Key-value persistence for credits, drafts, saved lessons and preferences.
//!
//! Values are JSON strings. Readers treat anything unparseable as absent and
//! remove it, so a corrupt entry never blocks the feature that owns it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

pub const KEY_SAVED_LESSON: &str = "fled-saved-lesson-plan";
pub const KEY_AUTOSAVE_DRAFT: &str = "fled-autosave-draft";
pub const KEY_THEME: &str = "fled-theme";
pub const KEY_ROLE: &str = "fled-user-role";
pub const KEY_CREDIT_MODE: &str = "fled-credit-system-mode";
pub const KEY_CREDITS_SIMPLE: &str = "fled-credits-simple";
pub const KEY_CREDITS_COMPLEX: &str = "fled-credits-complex";
pub const KEY_FEEDBACK_LOG: &str = "fled-feedback-log";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("storage I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("could not serialize value: {0}")]
  Serialize(#[from] serde_json::Error),
}

pub trait KvStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
  fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
  fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Read and decode a JSON value. Missing, unreadable or corrupt → `None`.
pub fn load_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Option<T> {
  let raw = match store.get(key) {
    Ok(Some(raw)) => raw,
    Ok(None) => return None,
    Err(e) => {
      warn!(target: "fled_backend", %key, error = %e, "Storage read failed; treating as absent");
      return None;
    }
  };
  match serde_json::from_str::<T>(&raw) {
    Ok(v) => Some(v),
    Err(e) => {
      warn!(target: "fled_backend", %key, error = %e, "Corrupt stored value; discarding");
      if let Err(e) = store.remove(key) {
        warn!(target: "fled_backend", %key, error = %e, "Could not remove corrupt value");
      }
      None
    }
  }
}

pub fn save_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<(), StoreError> {
  let raw = serde_json::to_string(value)?;
  store.set(key, &raw)
}

/// Volatile store, used in tests and when no data directory is writable.
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: Mutex<HashMap<String, String>>,
  writes: Mutex<usize>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of successful `set` calls so far.
  pub fn write_count(&self) -> usize {
    *self.writes.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl KvStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner()).insert(key.to_string(), value.to_string());
    *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    Ok(())
  }
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
  dir: PathBuf,
}

impl FileStore {
  pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
    let dir = dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&dir)?;
    debug!(target: "fled_backend", dir = %dir.display(), "File store opened");
    Ok(Self { dir })
  }

  fn path_for(&self, key: &str) -> PathBuf {
    let safe: String = key
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
      .collect();
    self.dir.join(format!("{}.json", safe))
  }
}

impl KvStore for FileStore {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    match std::fs::read_to_string(self.path_for(key)) {
      Ok(s) => Ok(Some(s)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    // Write-then-rename keeps a crash from leaving half a file behind.
    let path = self.path_for(key);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, value)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    match std::fs::remove_file(self.path_for(key)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}
