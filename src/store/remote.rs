//! Per-user remote record: one document per user id, written field by field.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{KvStore, StoreError};

/// A document database holding one JSON object per user.
/// Writes merge a single field into the document; they never replace it wholesale.
#[async_trait]
pub trait DocumentDb: Send + Sync {
  async fn get_field(&self, uid: &str, key: &str) -> Result<Option<Value>, StoreError>;
  async fn merge_field(&self, uid: &str, key: &str, value: Value) -> Result<(), StoreError>;
  async fn delete_field(&self, uid: &str, key: &str) -> Result<(), StoreError>;
  async fn delete_document(&self, uid: &str) -> Result<(), StoreError>;
}

/// In-process document database for development and tests.
#[derive(Default)]
pub struct MemoryDocumentDb {
  docs: RwLock<HashMap<String, Map<String, Value>>>,
}

#[async_trait]
impl DocumentDb for MemoryDocumentDb {
  async fn get_field(&self, uid: &str, key: &str) -> Result<Option<Value>, StoreError> {
    Ok(self.docs.read().await.get(uid).and_then(|d| d.get(key).cloned()))
  }

  async fn merge_field(&self, uid: &str, key: &str, value: Value) -> Result<(), StoreError> {
    self.docs.write().await.entry(uid.to_string()).or_default().insert(key.to_string(), value);
    Ok(())
  }

  async fn delete_field(&self, uid: &str, key: &str) -> Result<(), StoreError> {
    if let Some(doc) = self.docs.write().await.get_mut(uid) {
      doc.remove(key);
    }
    Ok(())
  }

  async fn delete_document(&self, uid: &str) -> Result<(), StoreError> {
    self.docs.write().await.remove(uid);
    Ok(())
  }
}

/// `KvStore` view of one user's document.
pub struct RemoteStore {
  db: Arc<dyn DocumentDb>,
  uid: String,
}

impl RemoteStore {
  pub fn new(db: Arc<dyn DocumentDb>, uid: String) -> Self {
    Self { db, uid }
  }
}

#[async_trait]
impl KvStore for RemoteStore {
  async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
    self.db.get_field(&self.uid, key).await
  }

  async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
    self.db.merge_field(&self.uid, key, value.clone()).await
  }

  async fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.db.delete_field(&self.uid, key).await
  }

  async fn clear(&self) -> Result<(), StoreError> {
    self.db.delete_document(&self.uid).await
  }
}
