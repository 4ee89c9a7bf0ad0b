//! Device-local key/value record stored as a single JSON object file.
//!
//! Writes go to a temp file in the same directory and are renamed over the
//! target, so a crash mid-write leaves the previous record intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tokio::task;
use tracing::{debug, instrument};

use super::{KvStore, StoreError};

pub struct LocalStore {
  path: PathBuf,
  record: RwLock<Map<String, Value>>,
}

impl LocalStore {
  /// Open (or lazily create) the record at `path`.
  pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
    let record = Self::read(path.clone()).await?.unwrap_or_default();
    debug!(target: "store", path = %path.display(), keys = record.len(), "Local record opened");
    Ok(Self { path, record: RwLock::new(record) })
  }

  /// Open the record at `path` only if a file is already there.
  pub async fn open_existing(path: PathBuf) -> Result<Option<Self>, StoreError> {
    let Some(record) = Self::read(path.clone()).await? else {
      return Ok(None);
    };
    debug!(target: "store", path = %path.display(), keys = record.len(), "Local record reopened");
    Ok(Some(Self { path, record: RwLock::new(record) }))
  }

  async fn read(path: PathBuf) -> Result<Option<Map<String, Value>>, StoreError> {
    task::spawn_blocking(move || read_record(&path))
      .await
      .map_err(|e| StoreError::Task(e.to_string()))?
  }

  #[allow(dead_code)]
  pub fn path(&self) -> &Path {
    &self.path
  }

  async fn flush(&self, snapshot: Map<String, Value>) -> Result<(), StoreError> {
    let path = self.path.clone();
    task::spawn_blocking(move || write_record(&path, &snapshot))
      .await
      .map_err(|e| StoreError::Task(e.to_string()))?
  }
}

#[async_trait]
impl KvStore for LocalStore {
  async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
    Ok(self.record.read().await.get(key).cloned())
  }

  #[instrument(level = "debug", skip(self, value))]
  async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
    // Hold the write guard across the flush so writes land in order.
    let mut record = self.record.write().await;
    record.insert(key.to_string(), value.clone());
    self.flush(record.clone()).await
  }

  async fn remove(&self, key: &str) -> Result<(), StoreError> {
    let mut record = self.record.write().await;
    if record.remove(key).is_some() {
      self.flush(record.clone()).await?;
    }
    Ok(())
  }

  async fn clear(&self) -> Result<(), StoreError> {
    let mut record = self.record.write().await;
    record.clear();
    self.flush(Map::new()).await
  }
}

fn read_record(path: &Path) -> Result<Option<Map<String, Value>>, StoreError> {
  match fs::read_to_string(path) {
    Ok(s) if s.trim().is_empty() => Ok(Some(Map::new())),
    Ok(s) => Ok(Some(serde_json::from_str(&s)?)),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e.into()),
  }
}

fn write_record(path: &Path, record: &Map<String, Value>) -> Result<(), StoreError> {
  let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
  fs::create_dir_all(dir)?;
  let mut tmp = NamedTempFile::new_in(dir)?;
  serde_json::to_writer_pretty(&mut tmp, record)?;
  tmp.flush()?;
  tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
  Ok(())
}
