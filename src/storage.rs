//! Session persistence contract.
//!
//! [`SessionStore`] is the key-value shape persistence backends implement:
//! save, load, delete and list by session id. [`InMemoryStore`] is the one
//! backend shipped with the crate; it is process-local and mainly useful for
//! tests and short-lived services.

use crate::types::Message;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Serializable state of a [`ChatSession`](crate::ChatSession).
///
/// The compactor is not part of a snapshot; supply one again on
/// [`ChatSession::restore`](crate::ChatSession::restore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    pub safety_margin: f64,
    pub messages: Vec<Message>,
}

/// Storage backend for session snapshots, keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or overwrite the snapshot stored under `snapshot.id`.
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Option<SessionSnapshot>>;

    /// Returns whether a snapshot was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Stored session ids, sorted.
    async fn list(&self) -> Result<Vec<String>>;
}

/// [`SessionStore`] backed by a map behind an async lock.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, SessionSnapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<SessionSnapshot>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
