//! Handoff orchestration
//!
//! After a hop produces a response, a present handoff request names the agent
//! that continues. The chain is bounded: once the depth ceiling is reached a
//! warning is logged and the last response stands. A handoff to an unknown
//! agent also ends the chain with the last response rather than failing it.

use crate::agent::response::{AgentResponse, HandoffRequest};
use crate::agent::{Agent, AgentDirectory, Executor};
use crate::config::DEFAULT_MAX_HANDOFF_DEPTH;
use crate::error::{DispatchError, DispatchResult, RouteType};
use crate::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// Ceiling on consecutive handoffs for one incoming message
pub const MAX_HANDOFF_DEPTH: usize = DEFAULT_MAX_HANDOFF_DEPTH;

/// State of the hop about to run
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffChainState {
    /// 1 for the first handoff
    pub depth: usize,
    pub from_agent_id: String,
    pub to_agent_id: String,
    /// Composed message the target receives
    pub message: String,
    pub carried_context: Option<Value>,
}

/// Completed hop, as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffHop {
    pub depth: usize,
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub message: String,
}

impl From<&HandoffChainState> for HandoffHop {
    fn from(state: &HandoffChainState) -> Self {
        Self {
            depth: state.depth,
            from_agent_id: state.from_agent_id.clone(),
            to_agent_id: state.to_agent_id.clone(),
            message: state.message.clone(),
        }
    }
}

/// What to do after a hop
pub enum HandoffDecision {
    /// No handoff requested
    Terminal,
    DepthExceeded { request: HandoffRequest },
    TargetMissing { request: HandoffRequest },
    Continue {
        state: HandoffChainState,
        agent: Arc<dyn Agent>,
    },
}

/// Result of running a chain to completion
#[derive(Debug, Clone)]
pub struct HandoffOutcome {
    pub response: AgentResponse,
    /// Agent that produced `response`; `None` for inline routes without handoff
    pub final_agent_id: Option<String>,
    pub depth: usize,
    pub chain: Vec<HandoffHop>,
}

#[derive(Clone)]
pub struct HandoffOrchestrator {
    agents: Arc<dyn AgentDirectory>,
    executor: Executor,
    max_depth: usize,
}

impl HandoffOrchestrator {
    pub fn new(agents: Arc<dyn AgentDirectory>, executor: Executor) -> Self {
        Self {
            agents,
            executor,
            max_depth: MAX_HANDOFF_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decide the hop following a response produced at `depth` by `from_id`
    pub async fn next_hop(
        &self,
        handoff: Option<&HandoffRequest>,
        from_id: &str,
        original_message: &str,
        depth: usize,
    ) -> HandoffDecision {
        let Some(request) = handoff else {
            return HandoffDecision::Terminal;
        };

        if depth >= self.max_depth {
            warn!(
                depth,
                max_depth = self.max_depth,
                from_agent_id = %from_id,
                to_agent_id = %request.target_agent_id,
                "Handoff depth limit reached, keeping last response"
            );
            return HandoffDecision::DepthExceeded {
                request: request.clone(),
            };
        }

        let Some(agent) = self.agents.get_agent_optional(&request.target_agent_id).await else {
            warn!(
                depth,
                from_agent_id = %from_id,
                to_agent_id = %request.target_agent_id,
                "Handoff target not found, keeping last response"
            );
            return HandoffDecision::TargetMissing {
                request: request.clone(),
            };
        };

        HandoffDecision::Continue {
            state: HandoffChainState {
                depth: depth + 1,
                from_agent_id: from_id.to_string(),
                to_agent_id: request.target_agent_id.clone(),
                message: request.compose_message(original_message),
                carried_context: request.context.clone(),
            },
            agent,
        }
    }

    /// Follow handoffs from the routed response until the chain ends
    ///
    /// `source_id` names whatever produced `initial` (agent, pipeline or
    /// intent); `initial_agent_id` is set only when that was an agent.
    pub async fn run(
        &self,
        initial: AgentResponse,
        source_id: &str,
        initial_agent_id: Option<String>,
        original_message: &str,
        conversation_id: &str,
        metadata: &Metadata,
    ) -> DispatchResult<HandoffOutcome> {
        let mut response = initial;
        let mut current_id = source_id.to_string();
        let mut final_agent_id = initial_agent_id;
        let mut depth = 0;
        let mut chain = Vec::new();

        loop {
            let decision = self
                .next_hop(response.handoff.as_ref(), &current_id, original_message, depth)
                .await;
            let HandoffDecision::Continue { state, agent } = decision else {
                break;
            };

            info!(
                depth = state.depth,
                from_agent_id = %state.from_agent_id,
                to_agent_id = %state.to_agent_id,
                "Handing off"
            );

            let span = crate::handoff_span!(
                depth = state.depth,
                from = %state.from_agent_id,
                to = %state.to_agent_id
            );
            response = self
                .executor
                .execute(&agent, &state.message, conversation_id, metadata, RouteType::Agent)
                .instrument(span)
                .await
                .map_err(|e| {
                    DispatchError::handoff(&state.from_agent_id, &state.to_agent_id, state.depth, e)
                })?;

            depth = state.depth;
            chain.push(HandoffHop::from(&state));
            current_id = state.to_agent_id.clone();
            final_agent_id = Some(state.to_agent_id);
        }

        Ok(HandoffOutcome {
            response,
            final_agent_id,
            depth,
            chain,
        })
    }
}
