//! Event vocabulary of a dispatch stream
//!
//! This is the wire contract to downstream adapters, which match on `type`.
//! Every event of one top-level message shares a `run_id` and carries a
//! strictly increasing `sequence`, continuous across handoff hops.

use crate::agent::response::{AgentResponse, ToolCall, ToolCallError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEventKind {
    RunStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        depth: usize,
    },
    Token {
        step: usize,
        delta: String,
    },
    ToolCall {
        step: usize,
        tool_call_id: String,
        tool_id: String,
        args: Value,
    },
    ToolResult {
        step: usize,
        tool_call_id: String,
        tool_id: String,
        result: Value,
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ToolCallError>,
    },
    /// Legacy shape for a failed call that produced no output
    ToolError {
        step: usize,
        tool_call_id: String,
        tool_id: String,
        error: ToolCallError,
    },
    StepComplete {
        step: usize,
    },
    HandoffStart {
        from_agent_id: String,
        to_agent_id: String,
        depth: usize,
        message: String,
    },
    RunEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
}

impl StreamEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEventKind::RunStart { .. } => "run-start",
            StreamEventKind::Token { .. } => "token",
            StreamEventKind::ToolCall { .. } => "tool-call",
            StreamEventKind::ToolResult { .. } => "tool-result",
            StreamEventKind::ToolError { .. } => "tool-error",
            StreamEventKind::StepComplete { .. } => "step-complete",
            StreamEventKind::HandoffStart { .. } => "handoff-start",
            StreamEventKind::RunEnd { .. } => "run-end",
        }
    }

    /// Outcome event for a realized tool call
    pub fn tool_outcome(
        step: usize,
        tool_call_id: String,
        tool_id: String,
        result: Option<Value>,
        error: Option<ToolCallError>,
    ) -> Option<Self> {
        match (result, error) {
            (Some(result), error) => Some(StreamEventKind::ToolResult {
                step,
                tool_call_id,
                tool_id,
                result,
                is_error: error.is_some(),
                error,
            }),
            (None, Some(error)) => Some(StreamEventKind::ToolError {
                step,
                tool_call_id,
                tool_id,
                error,
            }),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

/// Stamps events with the run id and the next sequence number
#[derive(Debug, Clone)]
pub struct EventSequencer {
    run_id: String,
    thread_id: Option<String>,
    next: u64,
}

impl EventSequencer {
    pub fn new(run_id: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id,
            next: 0,
        }
    }

    /// Sequencer with a fresh `run_<uuid>` id
    pub fn for_thread(thread_id: Option<String>) -> Self {
        Self::new(format!("run_{}", Uuid::new_v4().simple()), thread_id)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Sequence the next event will get
    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn emit(&mut self, kind: StreamEventKind) -> StreamEvent {
        let sequence = self.next;
        self.next += 1;
        StreamEvent {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
            sequence,
            emitted_at: Utc::now(),
            kind,
        }
    }
}

/// Deterministic events for a finished, non-streamed response
///
/// `run-start`, then per call a `tool-call` followed by its outcome, then one
/// `token` with the whole content, then `run-end`.
pub fn synthesize_response(
    sequencer: &mut EventSequencer,
    response: &AgentResponse,
    agent_id: Option<&str>,
    depth: usize,
) -> Vec<StreamEvent> {
    let mut events = Vec::with_capacity(response.tool_calls.len() * 2 + 3);
    events.push(sequencer.emit(StreamEventKind::RunStart {
        agent_id: agent_id.map(str::to_string),
        depth,
    }));

    for call in &response.tool_calls {
        events.extend(tool_events(sequencer, call, 0));
    }

    if !response.content.is_empty() {
        events.push(sequencer.emit(StreamEventKind::Token {
            step: 0,
            delta: response.content.clone(),
        }));
    }

    events.push(sequencer.emit(StreamEventKind::RunEnd {
        agent_id: agent_id.map(str::to_string),
    }));
    events
}

fn tool_events(sequencer: &mut EventSequencer, call: &ToolCall, step: usize) -> Vec<StreamEvent> {
    let mut events = vec![sequencer.emit(StreamEventKind::ToolCall {
        step,
        tool_call_id: call.id.clone(),
        tool_id: call.tool_id.clone(),
        args: call.args.clone(),
    })];

    if let Some(outcome) = StreamEventKind::tool_outcome(
        step,
        call.id.clone(),
        call.tool_id.clone(),
        call.result.clone(),
        call.error.clone(),
    ) {
        events.push(sequencer.emit(outcome));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let mut sequencer = EventSequencer::new("run_1", Some("conv_1".to_string()));
        let event = sequencer.emit(StreamEventKind::HandoffStart {
            from_agent_id: "a".to_string(),
            to_agent_id: "b".to_string(),
            depth: 1,
            message: "continue".to_string(),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "handoff-start");
        assert_eq!(value["runId"], "run_1");
        assert_eq!(value["threadId"], "conv_1");
        assert_eq!(value["sequence"], 0);
        assert!(value.get("emittedAt").is_some());
        assert_eq!(value["to_agent_id"], "b");
    }

    #[test]
    fn test_sequence_increments() {
        let mut sequencer = EventSequencer::for_thread(None);
        assert!(sequencer.run_id().starts_with("run_"));
        let a = sequencer.emit(StreamEventKind::StepComplete { step: 0 });
        let b = sequencer.emit(StreamEventKind::StepComplete { step: 1 });
        assert_eq!((a.sequence, b.sequence), (0, 1));
        assert_eq!(sequencer.peek(), 2);
        assert_eq!(a.run_id, b.run_id);
    }

    #[test]
    fn test_synthesized_order() {
        let response = AgentResponse::text("All done")
            .with_tool_call(ToolCall::new("search", json!({})).with_result(json!([])))
            .with_tool_call(
                ToolCall::new("fetch", json!({}))
                    .with_error(ToolCallError::from_message("404")),
            );

        let mut sequencer = EventSequencer::for_thread(None);
        let events = synthesize_response(&mut sequencer, &response, Some("a"), 0);
        let names: Vec<&str> = events.iter().map(|e| e.kind.name()).collect();

        assert_eq!(
            names,
            vec!["run-start", "tool-call", "tool-result", "tool-call", "tool-error", "token", "run-end"]
        );
    }

    #[test]
    fn test_result_with_error_is_flagged() {
        let kind = StreamEventKind::tool_outcome(
            0,
            "c1".to_string(),
            "t".to_string(),
            Some(json!("partial")),
            Some(ToolCallError::new("limit", "too big")),
        )
        .unwrap();
        assert!(matches!(kind, StreamEventKind::ToolResult { is_error: true, .. }));
        assert!(StreamEventKind::tool_outcome(0, "c".into(), "t".into(), None, None).is_none());
    }
}
