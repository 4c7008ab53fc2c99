//! Stream synthesizer
//!
//! Produces one flat, sequence-numbered event stream spanning every hop of a
//! handoff chain. Non-streaming hops are replayed from their finished
//! response; streaming hops are tapped event by event.
//!
//! While tapping, text and tool calls are accumulated per step. A step that
//! completes with tool calls is written to history immediately; anything left
//! is written when the hop's native stream ends.

use super::events::{synthesize_response, EventSequencer, StreamEvent, StreamEventKind};
use crate::agent::response::{
    extract_handoff_signal, split_handoff_signal, AgentResponse, HandoffRequest, ToolCall,
    ToolCallError,
};
use crate::agent::{Agent, AgentStreamEvent, Executor};
use crate::error::{DispatchError, DispatchResult, RouteType};
use crate::handoff::{HandoffChainState, HandoffDecision, HandoffOrchestrator};
use crate::history::{HistoryEntry, HistoryPolicy};
use crate::Metadata;
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, Instrument};

pub type EventStream = Pin<Box<dyn Stream<Item = DispatchResult<StreamEvent>> + Send>>;

/// Where a hop's response comes from
pub enum HopSource {
    Agent {
        agent: Arc<dyn Agent>,
        message: String,
        route_type: RouteType,
    },
    /// Response produced inline while routing
    Completed {
        response: AgentResponse,
        source_id: String,
    },
}

pub struct StreamRequest {
    pub conversation_id: String,
    pub original_message: String,
    pub metadata: Metadata,
    pub initial: HopSource,
}

#[derive(Debug, Default)]
struct StepState {
    text: String,
    calls: Vec<ToolCall>,
    flushed: bool,
}

/// Per-step accumulator for one tapped hop, indexed by step number
#[derive(Debug, Default)]
pub struct StepTap {
    steps: Vec<StepState>,
}

impl StepTap {
    pub fn new() -> Self {
        Self::default()
    }

    fn step_mut(&mut self, step: usize) -> &mut StepState {
        if step >= self.steps.len() {
            self.steps.resize_with(step + 1, StepState::default);
        }
        &mut self.steps[step]
    }

    pub fn push_text(&mut self, step: usize, text: &str) {
        self.step_mut(step).text.push_str(text);
    }

    pub fn record_call(&mut self, step: usize, call: ToolCall) {
        self.step_mut(step).calls.push(call);
    }

    /// Attach an outcome to a recorded call; unknown ids are recorded as new calls
    pub fn apply_result(
        &mut self,
        step: usize,
        tool_call_id: &str,
        tool_id: &str,
        result: Option<Value>,
        error: Option<ToolCallError>,
    ) {
        let existing = self
            .steps
            .iter_mut()
            .flat_map(|state| state.calls.iter_mut())
            .find(|call| call.id == tool_call_id);

        match existing {
            Some(call) => {
                call.result = result;
                call.error = error;
            }
            None => {
                let mut call = ToolCall::new(tool_id, Value::Null).with_id(tool_call_id);
                call.result = result;
                call.error = error;
                self.record_call(step, call);
            }
        }
    }

    pub fn has_calls(&self, step: usize) -> bool {
        self.steps.get(step).is_some_and(|state| !state.calls.is_empty())
    }

    /// History entries for `step`; empty once the step was flushed
    pub fn flush_step(&mut self, step: usize, agent_id: &str) -> Vec<HistoryEntry> {
        let state = self.step_mut(step);
        if state.flushed {
            return Vec::new();
        }
        state.flushed = true;
        HistoryPolicy::plan_step(&state.text, &state.calls, Some(agent_id))
    }

    /// History entries for every step not flushed yet, in step order
    pub fn flush_remaining(&mut self, agent_id: &str) -> Vec<HistoryEntry> {
        let mut entries = Vec::new();
        for step in 0..self.steps.len() {
            entries.extend(self.flush_step(step, agent_id));
        }
        entries
    }

    pub fn full_text(&self) -> String {
        self.steps.iter().map(|state| state.text.as_str()).collect()
    }

    /// Handoff signalled in the streamed text
    ///
    /// A signal found inside one unflushed step is cut out of that step's
    /// text so the control payload never reaches history.
    pub fn take_handoff_signal(&mut self) -> Option<HandoffRequest> {
        for state in self.steps.iter_mut().rev().filter(|state| !state.flushed) {
            if let Some((handoff, rest)) = split_handoff_signal(&state.text) {
                state.text = rest;
                return Some(handoff);
            }
        }
        extract_handoff_signal(&self.full_text())
    }
}

#[derive(Clone)]
pub struct StreamSynthesizer {
    executor: Executor,
    orchestrator: HandoffOrchestrator,
}

impl StreamSynthesizer {
    pub fn new(executor: Executor, orchestrator: HandoffOrchestrator) -> Self {
        Self {
            executor,
            orchestrator,
        }
    }

    pub fn run(&self, request: StreamRequest) -> EventStream {
        Box::pin(hop_events(
            self.executor.clone(),
            self.orchestrator.clone(),
            request,
        ))
    }
}

fn hop_events(
    executor: Executor,
    orchestrator: HandoffOrchestrator,
    request: StreamRequest,
) -> impl Stream<Item = DispatchResult<StreamEvent>> + Send {
    try_stream! {
        let StreamRequest {
            conversation_id,
            original_message,
            metadata,
            initial,
        } = request;

        let mut sequencer = EventSequencer::for_thread(Some(conversation_id.clone()));
        let span = crate::stream_span!(
            run_id = %sequencer.run_id(),
            conversation_id = %conversation_id
        );
        let mut hop = initial;
        let mut via: Option<HandoffChainState> = None;
        let mut depth = 0usize;

        loop {
            let (handoff, current_id): (Option<HandoffRequest>, String) = match hop {
                HopSource::Completed { response, source_id } => {
                    for event in synthesize_response(&mut sequencer, &response, None, depth) {
                        yield event;
                    }
                    (response.handoff, source_id)
                }
                HopSource::Agent { agent, message, route_type } => {
                    let agent_id = agent.id().to_string();
                    let persist = agent.settings().persist_history;
                    let input = executor
                        .prepare_input(agent.as_ref(), &message, &conversation_id, &metadata)
                        .instrument(span.clone())
                        .await
                        .map_err(|e| wrap_hop_error(via.as_ref(), e))?;

                    if agent.supports_streaming() {
                        yield sequencer.emit(StreamEventKind::RunStart {
                            agent_id: Some(agent_id.clone()),
                            depth,
                        });

                        let mut native = executor
                            .open_stream(agent.as_ref(), input, route_type)
                            .instrument(span.clone())
                            .await
                            .map_err(|e| wrap_hop_error(via.as_ref(), e))?;

                        let mut tap = StepTap::new();
                        let mut finish_handoff = None;

                        while let Some(item) = native.next().await {
                            let event = item.map_err(|e| {
                                wrap_hop_error(via.as_ref(), DispatchError::route_execution(route_type, e))
                            })?;

                            match event {
                                AgentStreamEvent::TextDelta { step, text } => {
                                    tap.push_text(step, &text);
                                    yield sequencer.emit(StreamEventKind::Token { step, delta: text });
                                }
                                AgentStreamEvent::ToolCall { step, call } => {
                                    yield sequencer.emit(StreamEventKind::ToolCall {
                                        step,
                                        tool_call_id: call.id.clone(),
                                        tool_id: call.tool_id.clone(),
                                        args: call.args.clone(),
                                    });
                                    tap.record_call(step, call);
                                }
                                AgentStreamEvent::ToolResult { step, tool_call_id, tool_id, result, error } => {
                                    tap.apply_result(step, &tool_call_id, &tool_id, result.clone(), error.clone());
                                    if let Some(kind) = StreamEventKind::tool_outcome(step, tool_call_id, tool_id, result, error) {
                                        yield sequencer.emit(kind);
                                    }
                                }
                                AgentStreamEvent::StepComplete { step } => {
                                    // Written before the event goes out so a consumer that
                                    // stops here still finds the step in history
                                    if tap.has_calls(step) {
                                        let entries = tap.flush_step(step, &agent_id);
                                        debug!(agent_id = %agent_id, step, entries = entries.len(), "Flushing completed step");
                                        if persist {
                                            executor
                                                .policy()
                                                .persist_entries(&conversation_id, entries)
                                                .await
                                                .map_err(|e| wrap_hop_error(via.as_ref(), e))?;
                                        }
                                    }
                                    yield sequencer.emit(StreamEventKind::StepComplete { step });
                                }
                                AgentStreamEvent::Finish { handoff } => {
                                    finish_handoff = handoff;
                                    break;
                                }
                            }
                        }

                        let handoff = finish_handoff.or_else(|| tap.take_handoff_signal());
                        let trailing = tap.flush_remaining(&agent_id);
                        if persist && !trailing.is_empty() {
                            executor
                                .policy()
                                .persist_entries(&conversation_id, trailing)
                                .await
                                .map_err(|e| wrap_hop_error(via.as_ref(), e))?;
                        }

                        yield sequencer.emit(StreamEventKind::RunEnd {
                            agent_id: Some(agent_id.clone()),
                        });
                        (handoff, agent_id)
                    } else {
                        let response = executor
                            .invoke(agent.as_ref(), input, route_type)
                            .instrument(span.clone())
                            .await
                            .map_err(|e| wrap_hop_error(via.as_ref(), e))?;
                        executor
                            .policy()
                            .persist_response(&conversation_id, &response, Some(&agent_id), persist)
                            .await
                            .map_err(|e| wrap_hop_error(via.as_ref(), e))?;

                        for event in synthesize_response(&mut sequencer, &response, Some(&agent_id), depth) {
                            yield event;
                        }
                        (response.handoff, agent_id)
                    }
                }
            };

            let decision = orchestrator
                .next_hop(handoff.as_ref(), &current_id, &original_message, depth)
                .await;

            match decision {
                HandoffDecision::Continue { state, agent } => {
                    yield sequencer.emit(StreamEventKind::HandoffStart {
                        from_agent_id: state.from_agent_id.clone(),
                        to_agent_id: state.to_agent_id.clone(),
                        depth: state.depth,
                        message: state.message.clone(),
                    });
                    depth = state.depth;
                    hop = HopSource::Agent {
                        agent,
                        message: state.message.clone(),
                        route_type: RouteType::Agent,
                    };
                    via = Some(state);
                }
                _ => break,
            }
        }

        debug!(
            run_id = %sequencer.run_id(),
            events = sequencer.peek(),
            depth,
            "Event stream finished"
        );
    }
}

/// Failures after the first handoff are reported as handoff failures
fn wrap_hop_error(via: Option<&HandoffChainState>, error: DispatchError) -> DispatchError {
    match via {
        Some(state) => DispatchError::handoff(
            &state.from_agent_id,
            &state.to_agent_id,
            state.depth,
            error,
        ),
        None => error,
    }
}
