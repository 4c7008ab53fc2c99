//! Conversation history: entry shapes, the store contract and the policy
//! deciding what of each exchange is written.
//!
//! Tool outcomes are stored as two distinct record shapes
//! ([`ToolOutcomeRecord::ToolSuccess`] and [`ToolOutcomeRecord::ToolFailure`])
//! so a reader never has to inspect a flag to tell them apart.

use crate::error::BoxError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod memory;
pub mod policy;

pub use memory::InMemoryHistory;
pub use policy::HistoryPolicy;

/// Author of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// Outcome of one tool call as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutcomeRecord {
    ToolSuccess {
        output: Value,
    },
    ToolFailure {
        error_code: String,
        error_message: String,
        output: Value,
    },
}

impl ToolOutcomeRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self, ToolOutcomeRecord::ToolFailure { .. })
    }
}

/// Tool invocation part of an assistant entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_id: String,
    pub args: Value,
}

/// Body of a history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryContent {
    Text {
        text: String,
    },
    ToolCalls {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        calls: Vec<ToolCallPart>,
    },
    ToolOutcome {
        tool_call_id: String,
        tool_id: String,
        outcome: ToolOutcomeRecord,
    },
}

/// One persisted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: EntryContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    fn new(role: MessageRole, content: EntryContent, agent_id: Option<&str>) -> Self {
        Self {
            role,
            content,
            agent_id: agent_id.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, EntryContent::Text { text: text.into() }, None)
    }

    pub fn assistant_text(text: impl Into<String>, agent_id: Option<&str>) -> Self {
        Self::new(
            MessageRole::Assistant,
            EntryContent::Text { text: text.into() },
            agent_id,
        )
    }

    pub fn assistant_tool_calls(
        text: Option<String>,
        calls: Vec<ToolCallPart>,
        agent_id: Option<&str>,
    ) -> Self {
        Self::new(
            MessageRole::Assistant,
            EntryContent::ToolCalls { text, calls },
            agent_id,
        )
    }

    pub fn tool_outcome(
        tool_call_id: impl Into<String>,
        tool_id: impl Into<String>,
        outcome: ToolOutcomeRecord,
        agent_id: Option<&str>,
    ) -> Self {
        Self::new(
            MessageRole::Tool,
            EntryContent::ToolOutcome {
                tool_call_id: tool_call_id.into(),
                tool_id: tool_id.into(),
                outcome,
            },
            agent_id,
        )
    }

    /// Plain text carried by the entry, if any
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            EntryContent::Text { text } => Some(text),
            EntryContent::ToolCalls { text, .. } => text.as_deref(),
            EntryContent::ToolOutcome { .. } => None,
        }
    }

    pub fn tool_outcome_record(&self) -> Option<&ToolOutcomeRecord> {
        match &self.content {
            EntryContent::ToolOutcome { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

/// Durable conversation store
#[async_trait]
pub trait ConversationHistory: Send + Sync {
    async fn generate_conversation_id(&self) -> Result<String, BoxError>;

    /// Entries in insertion order; unknown conversations are empty
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>, BoxError>;

    async fn add_message(&self, conversation_id: &str, entry: HistoryEntry)
        -> Result<(), BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_outcome_shapes_serialize_distinctly() {
        let success = ToolOutcomeRecord::ToolSuccess {
            output: json!({"temp": 21}),
        };
        let failure = ToolOutcomeRecord::ToolFailure {
            error_code: "timeout".to_string(),
            error_message: "weather service timed out".to_string(),
            output: Value::Null,
        };

        let success_json = serde_json::to_value(&success).unwrap();
        let failure_json = serde_json::to_value(&failure).unwrap();

        assert_eq!(success_json["kind"], "tool_success");
        assert!(success_json.get("error_code").is_none());
        assert_eq!(failure_json["kind"], "tool_failure");
        assert_eq!(failure_json["error_code"], "timeout");
        assert!(failure.is_failure());
        assert!(!success.is_failure());
    }

    #[test]
    fn test_entry_text_accessor() {
        assert_eq!(HistoryEntry::user_text("hi").text(), Some("hi"));
        let calls = HistoryEntry::assistant_tool_calls(Some("checking".into()), vec![], Some("a"));
        assert_eq!(calls.text(), Some("checking"));
        assert_eq!(calls.agent_id.as_deref(), Some("a"));

        let outcome = HistoryEntry::tool_outcome(
            "call_1",
            "search",
            ToolOutcomeRecord::ToolSuccess { output: json!(1) },
            None,
        );
        assert_eq!(outcome.text(), None);
        assert_eq!(outcome.role, MessageRole::Tool);
        assert!(outcome.tool_outcome_record().is_some());
    }

    #[test]
    fn test_entry_content_tagging() {
        let entry = HistoryEntry::assistant_text("done", Some("b"));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"]["type"], "text");
        assert_eq!(value["content"]["text"], "done");
    }
}
