//! Key/value persistence with two backends.
//!
//! `LocalStore` keeps a guest's record in a JSON file on this device.
//! `RemoteStore` keeps a signed-in user's record as one document in a `DocumentDb`.
//! `Persistence` picks one from an explicit identity and swallows failures:
//! reads degrade to "absent", writes report a `SaveStatus`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, instrument, warn};

use crate::auth::User;

pub mod local;
pub mod remote;

pub use local::LocalStore;
pub use remote::{DocumentDb, MemoryDocumentDb, RemoteStore};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store unreachable: {0}")]
  Unavailable(String),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("background task failed: {0}")]
  Task(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
  async fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;
  async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;
  async fn remove(&self, key: &str) -> Result<(), StoreError>;
  async fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveStatus {
  Saved,
  /// Logged and dropped.
  Failed,
  /// The remote store could not be reached; worth a non-blocking warning.
  Offline,
}

impl SaveStatus {
  pub fn warning(self) -> Option<&'static str> {
    match self {
      SaveStatus::Offline => Some("You appear to be offline. Changes were not saved."),
      _ => None,
    }
  }
}

/// Backend chosen for one identity.
#[derive(Clone)]
pub struct Persistence {
  backend: Arc<dyn KvStore>,
  remote: bool,
}

impl Persistence {
  /// `None` selects the device-local store, `Some(user)` the user's remote document.
  pub fn for_identity(user: Option<&User>, local: Arc<LocalStore>, db: Arc<dyn DocumentDb>) -> Self {
    match user {
      Some(u) => Self { backend: Arc::new(RemoteStore::new(db, u.uid.clone())), remote: true },
      None => Self { backend: local, remote: false },
    }
  }

  pub fn is_remote(&self) -> bool {
    self.remote
  }

  #[instrument(level = "debug", skip(self), fields(remote = self.remote))]
  pub async fn load(&self, key: &str) -> Option<Value> {
    match self.backend.load(key).await {
      Ok(v) => v,
      Err(e) => {
        error!(target: "store", %key, error = %e, "Load failed; treating as absent");
        None
      }
    }
  }

  pub async fn load_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.load(key).await?;
    match serde_json::from_value(value) {
      Ok(v) => Some(v),
      Err(e) => {
        warn!(target: "store", %key, error = %e, "Stored value has unexpected shape; ignoring");
        None
      }
    }
  }

  #[instrument(level = "debug", skip(self, value), fields(remote = self.remote))]
  pub async fn save(&self, key: &str, value: &Value) -> SaveStatus {
    match self.backend.save(key, value).await {
      Ok(()) => SaveStatus::Saved,
      Err(e) => self.failed(key, e),
    }
  }

  pub async fn save_as<T: Serialize>(&self, key: &str, value: &T) -> SaveStatus {
    match serde_json::to_value(value) {
      Ok(v) => self.save(key, &v).await,
      Err(e) => self.failed(key, e.into()),
    }
  }

  pub async fn remove(&self, key: &str) -> SaveStatus {
    match self.backend.remove(key).await {
      Ok(()) => SaveStatus::Saved,
      Err(e) => self.failed(key, e),
    }
  }

  pub async fn clear(&self) -> SaveStatus {
    match self.backend.clear().await {
      Ok(()) => SaveStatus::Saved,
      Err(e) => self.failed("*", e),
    }
  }

  fn failed(&self, key: &str, e: StoreError) -> SaveStatus {
    match e {
      StoreError::Unavailable(_) => {
        warn!(target: "store", %key, error = %e, "Store unreachable; write skipped");
        SaveStatus::Offline
      }
      other => {
        error!(target: "store", %key, error = %other, "Write failed");
        SaveStatus::Failed
      }
    }
  }
}
