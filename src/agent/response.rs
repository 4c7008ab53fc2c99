//! Normalized agent responses
//!
//! Every routing target (agent, pipeline, intent handler) produces an
//! [`AgentResponse`]. A response is either terminal or carries a
//! [`HandoffRequest`] naming the agent that should continue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Range;
use uuid::Uuid;

/// Error reported by a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallError {
    pub code: String,
    pub message: String,
}

impl ToolCallError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error with the generic `tool_error` code
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new("tool_error", message)
    }
}

/// One tool invocation made while producing a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_id: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolCallError>,
}

impl ToolCall {
    pub fn new(tool_id: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            tool_id: tool_id.into(),
            args,
            result: None,
            error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: ToolCallError) -> Self {
        self.error = Some(error);
        self
    }

    /// True once the tool produced a result or an error
    pub fn is_realized(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

/// Request to transfer the conversation to another agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRequest {
    #[serde(alias = "agentId", alias = "agent_id")]
    pub target_agent_id: String,
    /// Replacement message for the target; the original message is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Extra context appended to the target's message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl HandoffRequest {
    pub fn to(target_agent_id: impl Into<String>) -> Self {
        Self {
            target_agent_id: target_agent_id.into(),
            message: None,
            context: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Message the target receives: the replacement (or the original) with
    /// the serialized context appended
    pub fn compose_message(&self, original_message: &str) -> String {
        let base = self.message.as_deref().unwrap_or(original_message);
        match &self.context {
            Some(context) if !context.is_null() => {
                let rendered = match context {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{base}\n\nContext: {rendered}")
            }
            _ => base.to_string(),
        }
    }
}

/// Common response shape for every routing target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffRequest>,
}

impl AgentResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn with_handoff(mut self, handoff: HandoffRequest) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.handoff.is_none()
    }

    pub fn has_realized_tool_calls(&self) -> bool {
        self.tool_calls.iter().any(ToolCall::is_realized)
    }
}

#[derive(Deserialize)]
struct HandoffSignal {
    handoff: HandoffRequest,
}

/// Find a `{"handoff": {...}}` object embedded in streamed agent text
pub fn extract_handoff_signal(text: &str) -> Option<HandoffRequest> {
    split_handoff_signal(text).map(|(handoff, _)| handoff)
}

/// Like [`extract_handoff_signal`], also returning the text with the signal removed
pub fn split_handoff_signal(text: &str) -> Option<(HandoffRequest, String)> {
    if let Ok(signal) = serde_json::from_str::<HandoffSignal>(text.trim()) {
        return Some((signal.handoff, String::new()));
    }

    if let Some((range, json_str)) = extract_json_from_markdown(text) {
        if let Ok(signal) = serde_json::from_str::<HandoffSignal>(json_str) {
            return Some((signal.handoff, remove_range(text, range)));
        }
    }

    find_json_objects(text).into_iter().find_map(|(range, json_str)| {
        serde_json::from_str::<HandoffSignal>(json_str)
            .ok()
            .map(|signal| (signal.handoff, remove_range(text, range)))
    })
}

fn remove_range(text: &str, range: Range<usize>) -> String {
    format!("{}{}", &text[..range.start], &text[range.end..])
        .trim()
        .to_string()
}

/// Extract JSON from a markdown code block, with the byte range of the whole block
fn extract_json_from_markdown(text: &str) -> Option<(Range<usize>, &str)> {
    if let Some(start) = text.find("```json") {
        let body = start + 7;
        if let Some(end) = text[body..].find("```") {
            return Some((start..body + end + 3, text[body..body + end].trim()));
        }
    }

    if let Some(start) = text.find("```") {
        let body = start + 3;
        if let Some(end) = text[body..].find("```") {
            let potential_json = text[body..body + end].trim();
            if potential_json.starts_with('{') && potential_json.ends_with('}') {
                return Some((start..body + end + 3, potential_json));
            }
        }
    }

    None
}

/// Collect balanced top-level JSON objects in text, with their byte ranges
fn find_json_objects(text: &str) -> Vec<(Range<usize>, &str)> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start_pos = None;

    for (i, ch) in text.char_indices() {
        match ch {
            '{' => {
                if start_pos.is_none() {
                    start_pos = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = start_pos.take() {
                        let candidate = &text[start..=i];
                        if serde_json::from_str::<Value>(candidate).is_ok() {
                            found.push((start..i + 1, candidate));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    found
}
