//! In-process conversation store

use super::{ConversationHistory, HistoryEntry};
use crate::error::BoxError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Conversation store kept in memory, keyed by conversation id
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    conversations: RwLock<HashMap<String, Vec<HistoryEntry>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn clear(&self) {
        self.conversations.write().await.clear();
    }
}

#[async_trait]
impl ConversationHistory for InMemoryHistory {
    async fn generate_conversation_id(&self) -> Result<String, BoxError> {
        Ok(format!("conv_{}", Uuid::new_v4().simple()))
    }

    async fn get_history(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>, BoxError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        entry: HistoryEntry,
    ) -> Result<(), BoxError> {
        let mut conversations = self.conversations.write().await;
        let entries = conversations
            .entry(conversation_id.to_string())
            .or_default();
        entries.push(entry);
        debug!(
            conversation_id = %conversation_id,
            entries = entries.len(),
            "Appended history entry"
        );
        Ok(())
    }
}
