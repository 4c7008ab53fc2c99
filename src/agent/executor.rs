//! Executor: runs one agent hop
//!
//! A hop reads the prior turns (when the agent may see them), writes the
//! inbound message, invokes the agent and writes its response. Agent failures
//! are wrapped with the route type that selected the agent.

use super::{Agent, AgentEventStream, AgentInput, AgentResponse};
use crate::error::{DispatchError, DispatchResult, RouteType};
use crate::history::{HistoryEntry, HistoryPolicy};
use crate::Metadata;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct Executor {
    policy: HistoryPolicy,
}

impl Executor {
    pub fn new(policy: HistoryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &HistoryPolicy {
        &self.policy
    }

    /// History visible to `agent`
    pub async fn prior_messages(
        &self,
        agent: &dyn Agent,
        conversation_id: &str,
    ) -> DispatchResult<Vec<HistoryEntry>> {
        if !agent.settings().sequential_visibility {
            return Ok(Vec::new());
        }
        self.policy.load(conversation_id).await
    }

    /// Read visible history, then write the inbound message
    pub async fn prepare_input(
        &self,
        agent: &dyn Agent,
        message: &str,
        conversation_id: &str,
        metadata: &Metadata,
    ) -> DispatchResult<AgentInput> {
        let history = self.prior_messages(agent, conversation_id).await?;
        self.policy
            .persist_inbound(conversation_id, message, agent.settings().persist_history)
            .await?;

        Ok(AgentInput {
            message: message.to_string(),
            history,
            conversation_id: conversation_id.to_string(),
            metadata: metadata.clone(),
        })
    }

    /// Call the agent and normalize its failure
    pub async fn invoke(
        &self,
        agent: &dyn Agent,
        input: AgentInput,
        route_type: RouteType,
    ) -> DispatchResult<AgentResponse> {
        debug!(
            agent_id = %agent.id(),
            route_type = %route_type,
            history_len = input.history.len(),
            "Invoking agent"
        );

        agent.generate(input).await.map_err(|e| {
            error!(agent_id = %agent.id(), route_type = %route_type, error = %e, "Agent failed");
            DispatchError::route_execution(route_type, e)
        })
    }

    /// Open the agent's native event stream
    pub async fn open_stream(
        &self,
        agent: &dyn Agent,
        input: AgentInput,
        route_type: RouteType,
    ) -> DispatchResult<AgentEventStream> {
        debug!(agent_id = %agent.id(), route_type = %route_type, "Opening agent stream");
        agent
            .stream(input)
            .await
            .map_err(|e| DispatchError::route_execution(route_type, e))
    }

    /// Run a complete hop
    pub async fn execute(
        &self,
        agent: &Arc<dyn Agent>,
        message: &str,
        conversation_id: &str,
        metadata: &Metadata,
        route_type: RouteType,
    ) -> DispatchResult<AgentResponse> {
        let input = self
            .prepare_input(agent.as_ref(), message, conversation_id, metadata)
            .await?;
        let response = self.invoke(agent.as_ref(), input, route_type).await?;

        self.policy
            .persist_response(
                conversation_id,
                &response,
                Some(agent.id()),
                agent.settings().persist_history,
            )
            .await?;

        Ok(response)
    }
}
