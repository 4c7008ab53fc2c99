//! Agents: the routable handlers a message is executed against
//!
//! An agent produces an [`AgentResponse`] from an [`AgentInput`]. Agents that
//! stream natively also expose a stream of [`AgentStreamEvent`]s which the
//! stream synthesizer taps for per-step state and handoff signals.

pub mod executor;
pub mod registry;
pub mod response;
pub mod static_agent;

pub use executor::Executor;
pub use registry::{AgentDirectory, InMemoryAgentRegistry};
pub use response::*;
pub use static_agent::StaticAgent;

use crate::config::AgentSection;
use crate::error::BoxError;
use crate::history::HistoryEntry;
use crate::Metadata;
use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// Per-agent behaviour flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub utterances: Vec<String>,
    /// Write each hop of this agent to conversation history
    pub persist_history: bool,
    /// When false the agent sees no prior turns
    pub sequential_visibility: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            description: String::new(),
            utterances: Vec::new(),
            persist_history: true,
            sequential_visibility: true,
        }
    }
}

impl From<&AgentSection> for AgentSettings {
    fn from(section: &AgentSection) -> Self {
        Self {
            description: section.description.clone(),
            utterances: section.utterances.clone(),
            persist_history: section.persist_history,
            sequential_visibility: section.sequential_visibility,
        }
    }
}

/// Everything an agent is given for one hop
#[derive(Debug, Clone, Default)]
pub struct AgentInput {
    pub message: String,
    /// Prior turns, empty when sequential visibility is off
    pub history: Vec<HistoryEntry>,
    pub conversation_id: String,
    pub metadata: Metadata,
}

/// Native streaming output of an agent
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStreamEvent {
    TextDelta {
        step: usize,
        text: String,
    },
    ToolCall {
        step: usize,
        call: ToolCall,
    },
    ToolResult {
        step: usize,
        tool_call_id: String,
        tool_id: String,
        result: Option<Value>,
        error: Option<ToolCallError>,
    },
    StepComplete {
        step: usize,
    },
    Finish {
        handoff: Option<HandoffRequest>,
    },
}

pub type AgentEventStream =
    Pin<Box<dyn Stream<Item = Result<AgentStreamEvent, BoxError>> + Send>>;

#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn settings(&self) -> &AgentSettings;

    async fn generate(&self, input: AgentInput) -> Result<AgentResponse, BoxError>;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Native event stream; the default replays [`Agent::generate`] as one step
    async fn stream(&self, input: AgentInput) -> Result<AgentEventStream, BoxError> {
        let response = self.generate(input).await?;
        let events = response_to_native_events(response, 0);
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

/// Replay a finished response as the native events of a single step
pub fn response_to_native_events(response: AgentResponse, step: usize) -> Vec<AgentStreamEvent> {
    let mut events = Vec::with_capacity(response.tool_calls.len() * 2 + 3);
    let has_calls = !response.tool_calls.is_empty();

    for call in response.tool_calls {
        let (tool_call_id, tool_id) = (call.id.clone(), call.tool_id.clone());
        let (result, error) = (call.result.clone(), call.error.clone());
        let realized = call.is_realized();
        events.push(AgentStreamEvent::ToolCall {
            step,
            call: ToolCall {
                result: None,
                error: None,
                ..call
            },
        });
        if realized {
            events.push(AgentStreamEvent::ToolResult {
                step,
                tool_call_id,
                tool_id,
                result,
                error,
            });
        }
    }

    if !response.content.is_empty() {
        events.push(AgentStreamEvent::TextDelta {
            step,
            text: response.content,
        });
    }
    if has_calls {
        events.push(AgentStreamEvent::StepComplete { step });
    }
    events.push(AgentStreamEvent::Finish {
        handoff: response.handoff,
    });

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_default_to_persist_and_visible() {
        let settings = AgentSettings::default();
        assert!(settings.persist_history);
        assert!(settings.sequential_visibility);
    }

    #[test]
    fn test_native_replay_of_tool_response() {
        let response = AgentResponse::text("found it")
            .with_tool_call(
                ToolCall::new("search", json!({"q": "x"}))
                    .with_id("c1")
                    .with_result(json!(["hit"])),
            )
            .with_tool_call(ToolCall::new("noop", json!({})).with_id("c2"))
            .with_handoff(HandoffRequest::to("b"));

        let events = response_to_native_events(response, 2);

        assert!(matches!(&events[0], AgentStreamEvent::ToolCall { step: 2, call } if call.result.is_none()));
        assert!(matches!(&events[1], AgentStreamEvent::ToolResult { tool_call_id, .. } if tool_call_id == "c1"));
        assert!(matches!(&events[2], AgentStreamEvent::ToolCall { call, .. } if call.id == "c2"));
        assert!(matches!(&events[3], AgentStreamEvent::TextDelta { text, .. } if text == "found it"));
        assert_eq!(events[4], AgentStreamEvent::StepComplete { step: 2 });
        assert!(matches!(&events[5], AgentStreamEvent::Finish { handoff: Some(h) } if h.target_agent_id == "b"));
    }

    #[test]
    fn test_native_replay_of_plain_text() {
        let events = response_to_native_events(AgentResponse::text("hi"), 0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], AgentStreamEvent::Finish { handoff: None });
    }
}
