//! Conversation persistence: in-memory and file-backed stores.
//!
//! A [`ConversationStore`] saves and restores conversations keyed by
//! session id.  [`InMemoryStore`] is the default ephemeral choice;
//! [`FileStore`] writes one JSON file per session under a directory that is
//! created on first use.

use crate::agentllm::error::Result;
use crate::agentllm::model::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// One persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationData {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationData {
    pub fn new(session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage backend for conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(&self, data: &ConversationData) -> Result<()>;
    /// `None` when the session has never been saved.
    async fn load(&self, session_id: &str) -> Result<Option<ConversationData>>;
    /// All stored session ids.
    async fn list(&self) -> Result<Vec<String>>;
    /// Removing a missing session is a no-op.
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// Ephemeral store keeping conversations in a map.
///
/// Data is cloned on write and read, so callers can never observe or mutate
/// the store's internal state through returned values.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: Mutex<HashMap<String, ConversationData>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn save(&self, data: &ConversationData) -> Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(data.session_id.clone(), data.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<ConversationData>> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.sessions.lock().unwrap().keys().cloned().collect())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` so session ids are safe
/// file names.
pub fn sanitize_session_id(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One JSON file per session under `dir`, named `<sanitized-id>.json`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_session_id(session_id)))
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn save(&self, data: &ConversationData) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| crate::agentllm::error::AgentError::other(format!(
                "failed to create store directory: {}",
                e
            )))?;
        let json = serde_json::to_string_pretty(data)?;
        tokio::fs::write(self.path_for(&data.session_id), json)
            .await
            .map_err(|e| crate::agentllm::error::AgentError::other(format!(
                "failed to write conversation: {}",
                e
            )))?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<ConversationData>> {
        match tokio::fs::read_to_string(self.path_for(session_id)).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(crate::agentllm::error::AgentError::other(format!(
                "failed to read conversation: {}",
                e
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(crate::agentllm::error::AgentError::other(format!(
                    "failed to list store directory: {}",
                    e
                )))
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            crate::agentllm::error::AgentError::other(format!("failed to read entry: {}", e))
        })? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(crate::agentllm::error::AgentError::other(format!(
                "failed to delete conversation: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize_session_id("user/42:chat"), "user_42_chat");
        assert_eq!(sanitize_session_id("ok_id-7"), "ok_id-7");
        assert_eq!(sanitize_session_id("../../etc/passwd"), "______etc_passwd");
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_isolation() {
        let store = InMemoryStore::new();
        let mut data = ConversationData::new("s1", vec![Message::user("hi")]);
        store.save(&data).await.unwrap();

        // Mutating the caller's copy after save must not affect the store.
        data.messages.push(Message::assistant("mutated"));
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);

        // Mutating a loaded copy must not affect later loads.
        let mut loaded = loaded;
        loaded.messages.clear();
        let reloaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(reloaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_list_and_delete() {
        let store = InMemoryStore::new();
        store
            .save(&ConversationData::new("a", Vec::new()))
            .await
            .unwrap();
        store
            .save(&ConversationData::new("b", Vec::new()))
            .await
            .unwrap();

        let mut ids = store.list().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        store.delete("a").await.unwrap();
        store.delete("missing").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["b"]);
        assert!(store.load("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("conversations"));

        let data = ConversationData::new(
            "user/42",
            vec![Message::user("hello"), Message::assistant("hi")],
        );
        store.save(&data).await.unwrap();

        // The id is sanitized on disk but loadable under the original id.
        let loaded = store.load("user/42").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(store.list().await.unwrap(), vec!["user_42"]);

        store.delete("user/42").await.unwrap();
        assert!(store.load("user/42").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_missing_cases() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("never-created"));

        assert!(store.load("ghost").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
        store.delete("ghost").await.unwrap();
    }
}
