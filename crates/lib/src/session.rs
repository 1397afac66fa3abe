//! Conversations and message history for the chat UI.
//!
//! In-memory only; persisting conversations is left to the embedding application
//! (everything here is serde-serializable). `send_message` runs one generate call
//! through the gateway and records both sides of the exchange.

use crate::error::ServiceError;
use crate::gateway::ModelGateway;
use crate::llm::GenerateOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Unique conversation identifier (opaque string).
pub type ConversationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A conversation: title and ordered message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    conversations: Vec<Conversation>,
    current: Option<ConversationId>,
    /// Conversation numbers keep increasing after deletes so titles stay unique.
    created: usize,
    last_error: Option<String>,
    loading: bool,
}

impl StoreState {
    fn create(&mut self) -> Conversation {
        self.created += 1;
        let now = Utc::now();
        let conversation = Conversation {
            id: format!("conv-{}", uuid::Uuid::new_v4()),
            title: format!("Conversation {}", self.created),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.conversations.push(conversation.clone());
        self.current = Some(conversation.id.clone());
        conversation
    }

    /// Append to the current conversation, creating one if needed.
    fn push(&mut self, message: ChatMessage) -> ConversationId {
        let current = self
            .current
            .as_deref()
            .and_then(|id| self.conversations.iter().position(|c| c.id == id));
        let index = match current {
            Some(i) => i,
            None => {
                self.create();
                self.conversations.len() - 1
            }
        };
        let conversation = &mut self.conversations[index];
        conversation.updated_at = message.timestamp;
        conversation.messages.push(message);
        conversation.id.clone()
    }
}

/// In-memory conversation store (create, select, rename, delete, append).
#[derive(Default)]
pub struct ConversationStore {
    inner: RwLock<StoreState>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation and make it current.
    pub async fn create(&self) -> Conversation {
        self.inner.write().await.create()
    }

    /// Make `id` current. Returns false if it does not exist.
    pub async fn select(&self, id: &str) -> bool {
        let mut g = self.inner.write().await;
        if g.conversations.iter().any(|c| c.id == id) {
            g.current = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub async fn rename(&self, id: &str, title: impl Into<String>) -> bool {
        let mut g = self.inner.write().await;
        match g.conversations.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.title = title.into();
                c.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Delete a conversation. When it was current, the first remaining one becomes current.
    pub async fn delete(&self, id: &str) -> bool {
        let mut g = self.inner.write().await;
        let Some(index) = g.conversations.iter().position(|c| c.id == id) else {
            return false;
        };
        g.conversations.remove(index);
        if g.current.as_deref() == Some(id) {
            g.current = g.conversations.first().map(|c| c.id.clone());
        }
        true
    }

    pub async fn get(&self, id: &str) -> Option<Conversation> {
        self.inner
            .read()
            .await
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub async fn current(&self) -> Option<Conversation> {
        let g = self.inner.read().await;
        let id = g.current.as_deref()?;
        g.conversations.iter().find(|c| c.id == id).cloned()
    }

    pub async fn list(&self) -> Vec<Conversation> {
        self.inner.read().await.conversations.clone()
    }

    /// Append a message to the current conversation (created if none). Returns its id.
    pub async fn add_message(&self, role: Role, content: impl Into<String>) -> ConversationId {
        self.inner.write().await.push(ChatMessage::new(role, content))
    }

    /// Serialize one conversation as pretty JSON for export.
    pub async fn export(&self, id: &str) -> Option<String> {
        let conversation = self.get(id).await?;
        serde_json::to_string_pretty(&conversation).ok()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.last_error.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.read().await.loading
    }

    /// Drop all conversations and state.
    pub async fn reset(&self) {
        *self.inner.write().await = StoreState::default();
    }

    /// Record the user message, generate a reply with `model`, and record the reply.
    /// On failure the error is kept in `last_error` and returned; no assistant message is added.
    pub async fn send_message(
        &self,
        gateway: &ModelGateway,
        content: &str,
        model: &str,
    ) -> Result<ChatMessage, ServiceError> {
        {
            let mut g = self.inner.write().await;
            g.push(ChatMessage::new(Role::User, content));
            g.loading = true;
            g.last_error = None;
        }
        let result = gateway
            .generate_response(content, model, GenerateOptions::default())
            .await;
        let mut g = self.inner.write().await;
        g.loading = false;
        match result {
            Ok(text) => {
                let reply = ChatMessage::new(Role::Assistant, text);
                g.push(reply.clone());
                Ok(reply)
            }
            Err(err) => {
                log::warn!("generate failed: {}", err);
                g.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_message_creates_conversation() {
        let store = ConversationStore::new();
        let id = store.add_message(Role::User, "hi").await;
        let current = store.current().await.unwrap();
        assert_eq!(current.id, id);
        assert_eq!(current.title, "Conversation 1");
        assert_eq!(current.messages.len(), 1);
        assert_eq!(current.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn delete_current_selects_first_remaining() {
        let store = ConversationStore::new();
        let a = store.create().await;
        let b = store.create().await;
        assert_eq!(store.current().await.unwrap().id, b.id);
        assert!(store.delete(&b.id).await);
        assert_eq!(store.current().await.unwrap().id, a.id);
        assert!(store.delete(&a.id).await);
        assert!(store.current().await.is_none());
        assert!(!store.delete(&a.id).await);
    }

    #[tokio::test]
    async fn titles_stay_unique_after_delete() {
        let store = ConversationStore::new();
        let a = store.create().await;
        store.delete(&a.id).await;
        let b = store.create().await;
        assert_eq!(b.title, "Conversation 2");
    }

    #[tokio::test]
    async fn select_and_rename() {
        let store = ConversationStore::new();
        let a = store.create().await;
        let _b = store.create().await;
        assert!(store.select(&a.id).await);
        assert!(!store.select("missing").await);
        assert!(store.rename(&a.id, "Rust questions").await);
        assert_eq!(store.current().await.unwrap().title, "Rust questions");
    }

    #[tokio::test]
    async fn export_is_json() {
        let store = ConversationStore::new();
        let id = store.add_message(Role::User, "hello").await;
        let json = store.export(&id).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["messages"][0]["content"], "hello");
        assert_eq!(v["messages"][0]["role"], "user");
        assert!(store.export("missing").await.is_none());
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let store = ConversationStore::new();
        store.add_message(Role::User, "hello").await;
        store.reset().await;
        assert!(store.list().await.is_empty());
        assert!(store.current().await.is_none());
    }
}
