//! History persistence policy
//!
//! Runs once per completed hop (or per completed step on the streaming path):
//!
//! 1. the inbound message is written before any response content;
//! 2. a response with at least one realized tool call becomes one assistant
//!    entry (text plus one part per call) followed by one tool entry per call;
//! 3. otherwise non-empty text becomes a single assistant text entry.
//!
//! Text that accompanied tool calls travels inside the tool-calls entry and is
//! never written again as a separate assistant message.

use super::{ConversationHistory, HistoryEntry, ToolCallPart, ToolOutcomeRecord};
use crate::agent::response::{AgentResponse, ToolCall};
use crate::error::{DispatchError, DispatchResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Error code for a call that never produced a result or an error
pub const TOOL_NOT_EXECUTED: &str = "tool_not_executed";

/// Writes hop and step results to the conversation store
#[derive(Clone)]
pub struct HistoryPolicy {
    history: Arc<dyn ConversationHistory>,
}

impl HistoryPolicy {
    pub fn new(history: Arc<dyn ConversationHistory>) -> Self {
        Self { history }
    }

    /// Entries for a finished response, in write order
    pub fn plan_response(response: &AgentResponse, agent_id: Option<&str>) -> Vec<HistoryEntry> {
        Self::plan_step(&response.content, &response.tool_calls, agent_id)
    }

    /// Entries for accumulated step text and tool calls, in write order
    pub fn plan_step(text: &str, calls: &[ToolCall], agent_id: Option<&str>) -> Vec<HistoryEntry> {
        let text = (!text.trim().is_empty()).then(|| text.to_string());

        if calls.iter().any(ToolCall::is_realized) {
            let parts = calls
                .iter()
                .map(|call| ToolCallPart {
                    tool_call_id: call.id.clone(),
                    tool_id: call.tool_id.clone(),
                    args: call.args.clone(),
                })
                .collect();

            let mut entries = Vec::with_capacity(calls.len() + 1);
            entries.push(HistoryEntry::assistant_tool_calls(text, parts, agent_id));
            entries.extend(calls.iter().map(|call| {
                HistoryEntry::tool_outcome(&call.id, &call.tool_id, outcome_for(call), agent_id)
            }));
            return entries;
        }

        match text {
            Some(text) => vec![HistoryEntry::assistant_text(text, agent_id)],
            None => Vec::new(),
        }
    }

    /// Write the user message (or composed handoff message) for a hop
    pub async fn persist_inbound(
        &self,
        conversation_id: &str,
        message: &str,
        persist: bool,
    ) -> DispatchResult<()> {
        if !persist {
            return Ok(());
        }
        self.write(conversation_id, HistoryEntry::user_text(message))
            .await
    }

    /// Write a finished response
    pub async fn persist_response(
        &self,
        conversation_id: &str,
        response: &AgentResponse,
        agent_id: Option<&str>,
        persist: bool,
    ) -> DispatchResult<()> {
        if !persist {
            return Ok(());
        }
        self.persist_entries(conversation_id, Self::plan_response(response, agent_id))
            .await
    }

    /// Write pre-planned entries in order; stops at the first failed write
    pub async fn persist_entries(
        &self,
        conversation_id: &str,
        entries: Vec<HistoryEntry>,
    ) -> DispatchResult<()> {
        for entry in entries {
            self.write(conversation_id, entry).await?;
        }
        Ok(())
    }

    /// Current history, used to give each hop a fresh view
    pub async fn load(&self, conversation_id: &str) -> DispatchResult<Vec<HistoryEntry>> {
        self.history
            .get_history(conversation_id)
            .await
            .map_err(DispatchError::history)
    }

    async fn write(&self, conversation_id: &str, entry: HistoryEntry) -> DispatchResult<()> {
        debug!(
            conversation_id = %conversation_id,
            role = ?entry.role,
            "Persisting history entry"
        );
        self.history
            .add_message(conversation_id, entry)
            .await
            .map_err(DispatchError::history)
    }
}

/// Map a tool call onto its persisted outcome shape
pub fn outcome_for(call: &ToolCall) -> ToolOutcomeRecord {
    let output = call.result.clone().unwrap_or(Value::Null);
    match (&call.error, &call.result) {
        (Some(error), _) => ToolOutcomeRecord::ToolFailure {
            error_code: error.code.clone(),
            error_message: error.message.clone(),
            output,
        },
        (None, Some(_)) => ToolOutcomeRecord::ToolSuccess { output },
        (None, None) => ToolOutcomeRecord::ToolFailure {
            error_code: TOOL_NOT_EXECUTED.to_string(),
            error_message: format!("Tool '{}' produced no result", call.tool_id),
            output,
        },
    }
}
